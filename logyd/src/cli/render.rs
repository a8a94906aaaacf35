use std::io::{BufWriter, Write};

use anyhow::Result;
use hidpp::session::ProtocolState;
use logyd::discovery::tree::NodeSnapshot;
use owo_colors::OwoColorize;

/// Prints the device tree, colored or as a single line of JSON.
pub fn print(snapshot: &[NodeSnapshot], json: bool) -> Result<()> {
    let mut stdout = BufWriter::new(anstream::stdout());

    if json {
        writeln!(stdout, "{}", serde_json::to_string(snapshot)?)?;
        stdout.flush()?;
        return Ok(());
    }

    if snapshot.is_empty() {
        writeln!(stdout, "{}", "No HID++ devices were found.".bright_black())?;
        stdout.flush()?;
        return Ok(());
    }

    for (root_i, root) in snapshot.iter().enumerate() {
        if root_i != 0 {
            writeln!(stdout)?;
        }

        writeln!(
            stdout,
            "{}: {} ({}) {}",
            root.path.display().bright_black(),
            root.name,
            root.identity.bright_black(),
            describe(root),
        )?;
        writeln!(stdout, " │")?;

        if root.children.is_empty() {
            writeln!(
                stdout,
                " ╰─ {}",
                "No paired devices were found.".bright_black().italic()
            )?;
            continue;
        }

        let children_len = root.children.len();
        for (child_i, child) in root.children.iter().enumerate() {
            writeln!(
                stdout,
                "{} {}: {} ({}) {}",
                if child_i == children_len - 1 {
                    " ╰─"
                } else {
                    " ├─"
                },
                child.path.display().bright_blue(),
                child.name,
                child.identity.bright_black(),
                describe(child),
            )?;
        }
    }

    stdout.flush()?;
    Ok(())
}

fn describe(node: &NodeSnapshot) -> String {
    let dot = match node.state {
        ProtocolState::Online(_) => "●".green().to_string(),
        ProtocolState::Offline => "●".red().to_string(),
        ProtocolState::Unprobed | ProtocolState::Unknown => "●".yellow().to_string(),
    };

    let mut description = format!("{dot} {}", node.state);
    if node.pending_removal {
        description.push_str(&format!(" {}", "(removed)".bright_black().italic()));
    }
    description
}
