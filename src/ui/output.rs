use crate::ui::{Icons, theme};
use owo_colors::OwoColorize;

pub fn header(text: &str) {
    println!("{} {}", Icons::ROCKET, text.style(theme().header.clone()));
}

pub fn status(icon: &str, label: &str, value: &str) {
    println!("{} {}: {}", icon, label.style(theme().dim.clone()), value);
}

pub fn success(label: &str) {
    println!("{} {}", Icons::CHECK, label.style(theme().success.clone()));
}

pub fn warn(label: &str) {
    eprintln!("{} {}", Icons::WARN, label.style(theme().warn.clone()));
}

pub fn info(label: &str, value: &str) {
    println!(
        "{} {}: {}",
        Icons::INFO.style(theme().info.clone()),
        label.style(theme().dim.clone()),
        value
    );
}

pub fn section(title: &str) {
    println!();
    println!("━{}━", title.style(theme().header.clone()));
}

pub fn muted(text: &str) -> String {
    text.style(theme().muted.clone()).to_string()
}

fn row_ref(table: &str, id: &str) -> String {
    format!("{}#{}", table, id).style(theme().row.clone()).to_string()
}

/// One object written to `table`
pub fn row_saved(table: &str, id: &str) {
    println!("{} {}", Icons::NEW.style(theme().success.clone()), row_ref(table, id));
}

/// One row removed from `table`
pub fn row_deleted(table: &str, id: &str) {
    println!("{} {}", Icons::DEL.style(theme().error.clone()), row_ref(table, id));
}

pub fn row_failed(table: &str, id: &str, reason: &str) {
    eprintln!(
        "{} {} {}",
        Icons::CROSS.style(theme().error.clone()),
        row_ref(table, id),
        reason.style(theme().muted.clone())
    );
}

pub fn phase(name: &str) {
    println!();
    println!(
        "{} {}",
        Icons::GEAR.style(theme().info.clone()),
        name.style(theme().header.clone())
    );
}

pub fn timing(elapsed: &str) {
    println!("{} {}", Icons::CLOCK.style(theme().dim.clone()), elapsed);
}

pub fn summary_row(label: &str, value: &str) {
    println!("  {} {}", label.style(theme().dim.clone()), value);
}
