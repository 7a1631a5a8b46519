//! Property store and trigger queue backed by external programs.

use std::process::Command;

use anyhow::Result;
use fn_error_context::context;
use initmount_mount::props::{PropertyStore, TriggerQueue};
use initmount_utils::CommandRunExt;

/// Build a command from a configured argument vector.
fn command_from_argv(argv: &[String]) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("Empty command in configuration"))?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

/// Reads and writes properties through `getprop`/`setprop` style programs.
#[derive(Debug, Clone)]
pub(crate) struct CommandPropertyStore {
    pub(crate) getter: Vec<String>,
    pub(crate) setter: Vec<String>,
}

impl PropertyStore for CommandPropertyStore {
    #[context("Reading property {name}")]
    fn get(&self, name: &str) -> Result<Option<String>> {
        let value = command_from_argv(&self.getter)?
            .arg(name)
            .log_debug()
            .run_get_string()?;
        let value = value.trim_end_matches('\n');
        Ok((!value.is_empty()).then(|| value.to_owned()))
    }

    #[context("Setting property {name}")]
    fn set(&self, name: &str, value: &str) -> Result<()> {
        command_from_argv(&self.setter)?
            .args([name, value])
            .log_debug()
            .run_capture_stderr()
    }
}

/// Fires triggers by running a program with the trigger name appended.
#[derive(Debug, Clone)]
pub(crate) struct CommandTriggerQueue {
    pub(crate) argv: Vec<String>,
}

impl TriggerQueue for CommandTriggerQueue {
    #[context("Queueing trigger {trigger}")]
    fn queue_trigger(&self, trigger: &str) -> Result<()> {
        command_from_argv(&self.argv)?
            .arg(trigger)
            .log_debug()
            .run_capture_stderr()
    }
}
