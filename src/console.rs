//! console.rs
//! Interactive operator console: flips switches and flags through a manual TagClient and
//! starts/stops locally hosted modules, without restarting any process.

use std::io::{Write, stdin, stdout};

use log::{error, info};

use crate::{
    client::{
        supervision::{Selector, Slot},
        tag_client::TagClient,
    },
    datastore::namespace::SUPERVISION_LEN,
    demo::DynModule,
    error::{LinkError, LinkResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    EnableAll,
    DisableAll,
    ToggleSwitch(Slot),
    RaiseFlag(Slot),
    ClearFlag(Slot),
    StartModule(Slot),
    StopModule(Slot),
    Status,
    Browse,
    Exit,
}

fn needs_slot(choice: &str) -> bool {
    matches!(choice, "3" | "4" | "5" | "6" | "7")
}

/// `<menu choice> [slot]`, e.g. `3 2` toggles the estimator switch.
pub fn parse_command(line: &str) -> LinkResult<Command> {
    let mut tokens = line.split_whitespace();
    let choice = tokens.next().unwrap_or("8");
    let slot_token = tokens.next().unwrap_or_default();

    let slot = || -> LinkResult<Slot> {
        let pos: i32 = slot_token
            .parse()
            .map_err(|_| LinkError::Config(format!("'{}' is not a slot number", slot_token)))?;
        match Selector::try_from(pos)? {
            Selector::At(slot) => Ok(slot),
            Selector::All => Err(LinkError::Supervision(pos)),
        }
    };

    match choice {
        "1" => Ok(Command::EnableAll),
        "2" => Ok(Command::DisableAll),
        "3" => Ok(Command::ToggleSwitch(slot()?)),
        "4" => Ok(Command::RaiseFlag(slot()?)),
        "5" => Ok(Command::ClearFlag(slot()?)),
        "6" => Ok(Command::StartModule(slot()?)),
        "7" => Ok(Command::StopModule(slot()?)),
        "8" => Ok(Command::Status),
        "9" => Ok(Command::Browse),
        "0" | "q" | "exit" => Ok(Command::Exit),
        other => Err(LinkError::Config(format!("unrecognized option '{}'", other))),
    }
}

fn find_module(modules: &[DynModule], slot: Slot) -> LinkResult<&DynModule> {
    modules
        .iter()
        .find(|m| m.lock().slot() == slot)
        .ok_or_else(|| LinkError::Config(format!("no {} module hosted by this console", slot)))
}

/// Runs one command and returns the text to show the operator.
pub fn execute(client: &mut TagClient, modules: &[DynModule], command: Command) -> LinkResult<String> {
    match command {
        Command::EnableAll => {
            client.update_switches(Selector::All, &[1.0; SUPERVISION_LEN])?;
            Ok("all switches enabled".into())
        }
        Command::DisableAll => {
            client.update_switches(Selector::All, &[0.0; SUPERVISION_LEN])?;
            Ok("all switches disabled".into())
        }
        Command::ToggleSwitch(slot) => {
            let on = !client.check_switches(slot)?;
            client.set_switch(slot, on)?;
            Ok(format!("{} switch {}", slot, if on { "on" } else { "off" }))
        }
        Command::RaiseFlag(slot) => {
            client.set_flag(slot, true)?;
            Ok(format!("{} flag raised", slot))
        }
        Command::ClearFlag(slot) => {
            client.set_flag(slot, false)?;
            Ok(format!("{} flag cleared", slot))
        }
        Command::StartModule(slot) => {
            find_module(modules, slot)?.lock().start()?;
            Ok(format!("{} started", slot))
        }
        Command::StopModule(slot) => {
            find_module(modules, slot)?.lock().stop();
            Ok(format!("{} stopped", slot))
        }
        Command::Status => status_report(client, modules),
        Command::Browse => {
            let tags = client.browse()?;
            let mut out = format!("{:<28} {:>5} {:>8} {:>10}\n", "tag", "len", "writes", "age_ms");
            for tag in tags {
                out.push_str(&format!(
                    "{:<28} {:>5} {:>8} {:>10}\n",
                    tag.address, tag.len, tag.writes, tag.age_ms
                ));
            }
            Ok(out)
        }
        Command::Exit => Ok("bye".into()),
    }
}

pub fn status_report(client: &mut TagClient, modules: &[DynModule]) -> LinkResult<String> {
    let switches = client.switches()?;
    let flags = client.flags()?;
    let mut out = format!("switches {}  flags {}\n", switches, flags);
    for module in modules {
        let m = module.lock();
        let s = m.state();
        out.push_str(&format!(
            "{:<11} enabled={:<5} ready={:<5} initialized={:<5} iterations={}\n",
            m.name(),
            s.enabled,
            s.ready,
            s.initialized,
            s.iter_count
        ));
    }
    Ok(out)
}

fn read_input() -> Option<String> {
    let _ = stdout().flush();
    let mut input = String::new();
    match stdin().read_line(&mut input) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(input.trim().to_string()),
    }
}

fn prompt_menu() -> Option<String> {
    println!("\n┌─────────────────────────────────────────────┐");
    println!("│     OPERATOR CONSOLE                        │");
    println!("├─────────────────────────────────────────────┤");
    println!("│  1) Enable all switches                     │");
    println!("│  2) Disable all switches                    │");
    println!("│  3) Toggle a switch                         │");
    println!("│  4) Raise a flag                            │");
    println!("│  5) Clear a flag                            │");
    println!("│  6) Start a module                          │");
    println!("│  7) Stop a module                           │");
    println!("│  8) Show status                             │");
    println!("│  9) Browse tags                             │");
    println!("│  0) Exit                                    │");
    println!("└─────────────────────────────────────────────┘");
    print!("Select [0-9] (default: 8): ");
    read_input()
}

fn prompt_slot() -> Option<String> {
    print!("Slot [0=controller 1=simulator 2=estimator 3=monitoring 4=extra]: ");
    read_input()
}

/// Menu loop until the operator exits or stdin closes.
pub fn run_console(client: &mut TagClient, modules: &[DynModule]) {
    info!("=== OPERATOR CONSOLE START ===");
    while let Some(mut line) = prompt_menu() {
        let choice = line.split_whitespace().next().unwrap_or_default().to_string();
        if needs_slot(&choice) && line.split_whitespace().nth(1).is_none() {
            let Some(slot) = prompt_slot() else { break };
            line = format!("{} {}", choice, slot);
        }

        match parse_command(&line) {
            Ok(Command::Exit) => break,
            Ok(command) => match execute(client, modules, command) {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    error!("[Console] {:?} failed: {}", command, e);
                    println!("Command failed: {}", e);
                    if !client.is_connected() {
                        match client.connect() {
                            Ok(()) => println!("Reconnected to the data store."),
                            Err(e) => println!("Data store unreachable: {}", e),
                        }
                    }
                }
            },
            Err(e) => println!("{}, please try again.", e),
        }
    }
    info!("=== OPERATOR CONSOLE FINISHED ===");
}
