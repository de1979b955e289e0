use console::style;
use dialoguer::{theme::ColorfulTheme, Confirm};

/// Print success message
pub fn success(msg: &str) {
    println!("{} {}", style("✔").green(), msg);
}

/// Print warning message
pub fn warn(msg: &str) {
    println!("{} {}", style("!").yellow(), msg);
}

/// Print error message
pub fn error(msg: &str) {
    println!("{} {}", style("✖").red(), msg);
}

/// Print info message (indented)
pub fn info(msg: &str) {
    println!("  {}", msg);
}

/// Print a header/title
pub fn header(msg: &str) {
    println!();
    println!("  {}", style(msg).bold());
    println!();
}

/// Ask a yes/no question, defaulting to no
pub fn prompt_confirm(prompt: &str) -> anyhow::Result<bool> {
    let result = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()?;
    Ok(result)
}

/// "global" or "guild <id>"
pub fn scope_label(guild: Option<&str>) -> String {
    match guild {
        Some(id) => format!("guild {}", id),
        None => "global".to_string(),
    }
}
