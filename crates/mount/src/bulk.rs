//! The `mount_all` builtin.
//!
//! The bulk-mount routine runs in a separate process so that a crash or
//! leak in it cannot take init down with it. The only thing the parent
//! learns is the child's exit status.

use std::ffi::OsString;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus};

use camino::Utf8Path;
use initmount_utils::{CommandRunExt, LOG_ENV};
use tracing::level_filters::LevelFilter;

use crate::MountError;
use crate::props::{
    CRYPTO_STATE_PROP, NONENCRYPTED_TRIGGER, PropertyStore, TriggerQueue, VOLD_DECRYPT_PROP,
    set_logged,
};

/// Least verbose level the child logs at.
const CHILD_LOG_LEVEL: LevelFilter = LevelFilter::INFO;

/// Log filter for the child, given the parent's [`LOG_ENV`] value.
///
/// A plain level is raised to at least `info`. Anything else is a
/// directive list chosen on purpose and is passed through untouched.
fn child_log_filter(parent: Option<&str>) -> String {
    match parent.map(str::trim).filter(|v| !v.is_empty()) {
        None => CHILD_LOG_LEVEL.to_string(),
        Some(v) => match v.parse::<LevelFilter>() {
            Ok(level) => level.max(CHILD_LOG_LEVEL).to_string(),
            Err(_) => v.to_owned(),
        },
    }
}

/// Result of the bulk mount, as carried by the child's exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkMountResult {
    /// At least one volume is encrypted.
    Encrypted,
    /// Every volume mounted and none is encrypted.
    Unencrypted,
    /// The routine failed, or the child did not exit cleanly.
    Error,
}

impl BulkMountResult {
    /// Decode a child's exit status: `1` and `0` are the two success
    /// states, anything else (including death by signal) is an error.
    pub fn from_exit_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(1) => Self::Encrypted,
            Some(0) => Self::Unencrypted,
            _ => Self::Error,
        }
    }

    /// The exit code the child reports this result with; also the status
    /// the `mount_all` command returns.
    pub fn status(self) -> i32 {
        match self {
            Self::Encrypted => 1,
            Self::Unencrypted => 0,
            Self::Error => -1,
        }
    }
}

/// Runs the bulk-mount routine in an isolated execution context.
pub trait IsolatedRunner: std::fmt::Debug {
    /// Run the routine over the storage table at `fstab` and wait for it.
    fn run_isolated(&self, fstab: &Utf8Path) -> Result<ExitStatus, MountError>;
}

/// Runs a program in a child process, with the storage table path
/// appended to its arguments.
#[derive(Debug, Clone)]
pub struct ChildProcessRunner {
    program: OsString,
    args: Vec<OsString>,
}

impl ChildProcessRunner {
    /// Run `program args... <fstab>`.
    pub fn new(
        program: impl Into<OsString>,
        args: impl IntoIterator<Item = impl Into<OsString>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl IsolatedRunner for ChildProcessRunner {
    fn run_isolated(&self, fstab: &Utf8Path) -> Result<ExitStatus, MountError> {
        let parent_filter = std::env::var(LOG_ENV).ok();
        // No timeout: a hung child blocks here.
        Command::new(&self.program)
            .args(&self.args)
            .arg(fstab.as_str())
            .env(LOG_ENV, child_log_filter(parent_filter.as_deref()))
            .log_debug()
            .status()
            .map_err(|e| MountError::ChildTermination {
                reason: format!("spawning {}: {e}", self.program.to_string_lossy()),
            })
    }
}

/// Supervises the isolated bulk mount and publishes its result.
#[derive(Debug)]
pub struct BulkMountSupervisor<'a> {
    /// Where the routine runs.
    pub runner: &'a dyn IsolatedRunner,
    /// Receives the encryption state.
    pub properties: &'a dyn PropertyStore,
    /// Receives the `nonencrypted` trigger.
    pub triggers: &'a dyn TriggerQueue,
}

impl BulkMountSupervisor<'_> {
    /// Mount everything in the storage table at `fstab`.
    pub fn mount_all(&self, fstab: &Utf8Path) -> BulkMountResult {
        let result = match self.runner.run_isolated(fstab) {
            Ok(status) => {
                if let Some(signal) = status.signal() {
                    tracing::error!("Bulk mount child killed by signal {signal}");
                }
                BulkMountResult::from_exit_status(status)
            }
            Err(e) => {
                tracing::error!("{e}");
                BulkMountResult::Error
            }
        };
        tracing::info!("Bulk mount of {fstab}: {result:?}");
        match result {
            BulkMountResult::Encrypted => {
                set_logged(self.properties, CRYPTO_STATE_PROP, "encrypted");
                set_logged(self.properties, VOLD_DECRYPT_PROP, "1");
            }
            BulkMountResult::Unencrypted => {
                set_logged(self.properties, CRYPTO_STATE_PROP, "unencrypted");
                if let Err(e) = self.triggers.queue_trigger(NONENCRYPTED_TRIGGER) {
                    tracing::error!("Queueing trigger {NONENCRYPTED_TRIGGER}: {e:#}");
                }
            }
            BulkMountResult::Error => {
                tracing::error!("Bulk mount of {fstab} returned an error");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props::tests::{FakeProperties, FakeTriggers};
    use std::cell::RefCell;

    /// Reports a canned wait status.
    #[derive(Debug)]
    struct CannedRunner {
        raw: Option<i32>,
        seen: RefCell<Vec<String>>,
    }

    impl CannedRunner {
        fn exit(code: i32) -> Self {
            Self::raw(code << 8)
        }

        fn raw(raw: i32) -> Self {
            Self {
                raw: Some(raw),
                seen: Default::default(),
            }
        }
    }

    impl IsolatedRunner for CannedRunner {
        fn run_isolated(&self, fstab: &Utf8Path) -> Result<ExitStatus, MountError> {
            self.seen.borrow_mut().push(fstab.to_string());
            match self.raw {
                Some(raw) => Ok(ExitStatus::from_raw(raw)),
                None => Err(MountError::ChildTermination {
                    reason: "fork failed".into(),
                }),
            }
        }
    }

    fn run(runner: &dyn IsolatedRunner) -> (BulkMountResult, FakeProperties, FakeTriggers) {
        let props = FakeProperties::default();
        let triggers = FakeTriggers::default();
        let r = BulkMountSupervisor {
            runner,
            properties: &props,
            triggers: &triggers,
        }
        .mount_all(Utf8Path::new("/fstab.device"));
        (r, props, triggers)
    }

    #[test]
    fn test_encrypted() {
        let runner = CannedRunner::exit(1);
        let (r, props, triggers) = run(&runner);
        assert_eq!(r, BulkMountResult::Encrypted);
        assert_eq!(r.status(), 1);
        assert_eq!(*runner.seen.borrow(), vec!["/fstab.device"]);
        similar_asserts::assert_eq!(
            *props.writes.borrow(),
            vec![
                ("ro.crypto.state".to_string(), "encrypted".to_string()),
                ("vold.decrypt".to_string(), "1".to_string()),
            ]
        );
        assert!(triggers.fired.borrow().is_empty());
    }

    #[test]
    fn test_unencrypted() {
        let (r, props, triggers) = run(&CannedRunner::exit(0));
        assert_eq!(r, BulkMountResult::Unencrypted);
        assert_eq!(r.status(), 0);
        assert_eq!(props.value("ro.crypto.state").as_deref(), Some("unencrypted"));
        assert_eq!(props.value("vold.decrypt"), None);
        assert_eq!(*triggers.fired.borrow(), vec!["nonencrypted"]);
    }

    #[test]
    fn test_errors_publish_nothing() {
        // Exit code 255, i.e. the child's -1
        let exited = CannedRunner::exit(255);
        // SIGKILL
        let signaled = CannedRunner::raw(9);
        let unspawnable = CannedRunner {
            raw: None,
            seen: Default::default(),
        };
        for runner in [exited, signaled, unspawnable] {
            let (r, props, triggers) = run(&runner);
            assert_eq!(r, BulkMountResult::Error);
            assert_eq!(r.status(), -1);
            assert!(props.writes.borrow().is_empty());
            assert!(triggers.fired.borrow().is_empty());
        }
    }

    #[test]
    fn test_child_log_filter() {
        assert_eq!(child_log_filter(None), "info");
        assert_eq!(child_log_filter(Some("")), "info");
        assert_eq!(child_log_filter(Some("warn")), "info");
        assert_eq!(child_log_filter(Some("off")), "info");
        assert_eq!(child_log_filter(Some("debug")), "debug");
        assert_eq!(child_log_filter(Some("TRACE")), "trace");
        assert_eq!(
            child_log_filter(Some("warn,initmount_lib=debug")),
            "warn,initmount_lib=debug"
        );
    }

    /// Set in the re-executed test binary to make it fail like a child
    /// whose setup errored out.
    const FAILING_CHILD_ENV: &str = "INITMOUNT_TEST_FAILING_CHILD";

    #[test]
    fn test_child_error_exit_is_not_encrypted() -> anyhow::Result<()> {
        if std::env::var_os(FAILING_CHILD_ENV).is_some() {
            initmount_utils::run_main(|| anyhow::bail!("loading configuration failed"));
            return Ok(());
        }
        let exe = std::env::current_exe()?;
        let runner = ChildProcessRunner::new(
            "env",
            [
                format!("{FAILING_CHILD_ENV}=1").into(),
                exe.into_os_string(),
                "--exact".into(),
                "bulk::tests::test_child_error_exit_is_not_encrypted".into(),
                "--test-threads=1".into(),
            ]
            .into_iter()
            .collect::<Vec<OsString>>(),
        );
        let status = runner.run_isolated(Utf8Path::new("/fstab.device"))?;
        assert_eq!(status.code(), Some(255));
        let (r, props, triggers) = run(&runner);
        assert_eq!(r, BulkMountResult::Error);
        assert!(props.writes.borrow().is_empty());
        assert!(triggers.fired.borrow().is_empty());
        Ok(())
    }

    #[test]
    fn test_child_process_runner() -> anyhow::Result<()> {
        let runner = ChildProcessRunner::new("sh", ["-c", r#"test "$1" = /t && exit 1"#, "sh"]);
        let status = runner.run_isolated(Utf8Path::new("/t"))?;
        assert_eq!(BulkMountResult::from_exit_status(status), BulkMountResult::Encrypted);

        let runner = ChildProcessRunner::new("sh", ["-c", r#"test "$INITMOUNT_LOG" = info"#, "sh"]);
        let status = runner.run_isolated(Utf8Path::new("/t"))?;
        assert_eq!(BulkMountResult::from_exit_status(status), BulkMountResult::Unencrypted);

        let runner = ChildProcessRunner::new("sh", ["-c", "kill -9 $$", "sh"]);
        let status = runner.run_isolated(Utf8Path::new("/t"))?;
        assert_eq!(BulkMountResult::from_exit_status(status), BulkMountResult::Error);

        let runner = ChildProcessRunner::new("/nonexistent/initmount", Vec::<String>::new());
        assert!(matches!(
            runner.run_isolated(Utf8Path::new("/t")),
            Err(MountError::ChildTermination { .. })
        ));
        Ok(())
    }
}
