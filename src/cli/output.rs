// Output formatting and display for CLI

use crate::ipc::protocol::{InstanceLogs, ResponseData};
use crate::process::{InstanceInfo, InstanceState, LifecycleEvent, OperationReport};
use chrono::{DateTime, Local};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print a successful response to stdout
pub fn print_response(data: &ResponseData) {
    match data {
        ResponseData::Applied(report) => print_report(report),

        ResponseData::Stopped { name } => {
            println!("{}", format!("✓ {} stopped", name).green().bold());
        }

        ResponseData::InstanceList(instances) => {
            if instances.is_empty() {
                println!("{}", "No processes are currently managed".yellow());
            } else {
                print_instance_table(instances);
            }
        }

        ResponseData::Logs(logs) => print_logs(logs),

        ResponseData::Event(event) => print_event(event),

        ResponseData::DaemonStatus {
            pid,
            uptime,
            instances,
        } => {
            println!("{}", "✓ Daemon is running".green().bold());
            println!("  {}: {}", "PID".bold(), pid);
            println!("  {}: {}", "Uptime".bold(), format_duration(uptime));
            println!("  {}: {}", "Instances".bold(), instances);
        }

        ResponseData::Success(message) => {
            println!("{} {}", "✓".green().bold(), message);
        }
    }
}

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

fn print_report(report: &OperationReport) {
    let groups = [
        ("started", &report.started),
        ("replaced", &report.replaced),
        ("scaled", &report.scaled),
        ("unchanged", &report.unchanged),
        ("removed", &report.removed),
    ];

    for (label, names) in groups {
        for name in names {
            println!("{} {} {}", "✓".green().bold(), name.cyan(), label);
        }
    }

    for rejection in &report.rejected {
        println!(
            "{} {} {}",
            "✗".red().bold(),
            rejection.name.cyan(),
            rejection.reason.red()
        );
    }
}

/// Print a formatted table of instances
fn print_instance_table(instances: &[InstanceInfo]) {
    #[derive(Tabled)]
    struct InstanceRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "#")]
        index: usize,
        #[tabled(rename = "Mode")]
        mode: String,
        #[tabled(rename = "State")]
        state: String,
        #[tabled(rename = "PID")]
        pid: String,
        #[tabled(rename = "CPU")]
        cpu: String,
        #[tabled(rename = "Memory")]
        memory: String,
        #[tabled(rename = "Uptime")]
        uptime: String,
        #[tabled(rename = "Restarts")]
        restarts: usize,
        #[tabled(rename = "Profile")]
        profile: String,
    }

    let rows: Vec<InstanceRow> = instances
        .iter()
        .map(|i| InstanceRow {
            name: truncate(&i.name, 20),
            index: i.index,
            mode: i.exec_mode.to_string(),
            state: format_state_colored(i.state),
            pid: i
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
            cpu: format!("{:.1}%", i.cpu_usage),
            memory: format_memory(i.memory_usage),
            uptime: format_duration(&i.uptime),
            restarts: i.restarts,
            profile: i.profile.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
    println!(
        "{}",
        format!("Total: {} instance(s)", instances.len())
            .dimmed()
            .italic()
    );
}

fn print_logs(logs: &[InstanceLogs]) {
    if logs.iter().all(|l| l.stdout.is_empty() && l.stderr.is_empty()) {
        println!("{}", "No logs available".yellow());
        return;
    }

    for log in logs {
        println!("\n{}", log.key.to_string().bold().underline());
        for line in &log.stdout {
            println!("{}", line);
        }
        for line in &log.stderr {
            println!("{}", line.red());
        }
    }
    println!();
}

/// Print one lifecycle event with a local timestamp
pub fn print_event(event: &LifecycleEvent) {
    let now: DateTime<Local> = Local::now();
    let text = match event {
        LifecycleEvent::Launched { .. } | LifecycleEvent::Stopped { .. } => {
            event.to_string().green().to_string()
        }
        LifecycleEvent::LaunchFailed { .. }
        | LifecycleEvent::MonitorLost { .. }
        | LifecycleEvent::GivenUp { .. }
        | LifecycleEvent::Killed { .. } => event.to_string().red().bold().to_string(),
        LifecycleEvent::Exited { .. } | LifecycleEvent::RestartScheduled { .. } => {
            event.to_string().yellow().to_string()
        }
        LifecycleEvent::Stopping { .. } | LifecycleEvent::Removed { .. } => {
            event.to_string().bright_black().to_string()
        }
    };
    println!("{} {}", format!("[{}]", now.format("%H:%M:%S")).dimmed(), text);
}

fn format_state_colored(state: InstanceState) -> String {
    match state {
        InstanceState::Running => state.to_string().green().to_string(),
        InstanceState::Starting
        | InstanceState::Stopping
        | InstanceState::RestartScheduled => state.to_string().yellow().to_string(),
        InstanceState::Stopped => state.to_string().bright_black().to_string(),
        InstanceState::Crashed | InstanceState::GivenUp => state.to_string().red().bold().to_string(),
    }
}

/// Format a duration in human-readable format
fn format_duration(duration: &Duration) -> String {
    const UNITS: [(u64, &str); 4] = [(86_400, "d"), (3600, "h"), (60, "m"), (1, "s")];

    let secs = duration.as_secs();
    // Largest unit plus the next one down, if non-zero
    let Some(first) = UNITS.iter().position(|(size, _)| secs >= *size) else {
        return "0s".to_string();
    };
    let (size, unit) = UNITS[first];
    let mut out = format!("{}{}", secs / size, unit);
    if let Some(&(next_size, next_unit)) = UNITS.get(first + 1) {
        let rest = (secs % size) / next_size;
        if rest > 0 {
            out.push_str(&format!(" {}{}", rest, next_unit));
        }
    }
    out
}

fn format_memory(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in ["B", "KB", "MB"] {
        if value < 1024.0 {
            return if unit == "B" {
                format!("{}B", bytes)
            } else {
                format!("{:.1}{}", value, unit)
            };
        }
        value /= 1024.0;
    }
    format!("{:.2}GB", value)
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Spinner for requests that wait on the daemon
pub fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn finish_progress_success(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✓".green(), message));
}

pub fn finish_progress_error(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✗".red(), message));
}
