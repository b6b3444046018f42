use super::comm::{Communicator, SharedCommunicator, SingleProcess};
use crate::common::SessionConfig;
use crate::domain::{ErrorContext, HarmError, HarmResult};
use std::fmt;

static SINGLE_PROCESS: SingleProcess = SingleProcess;

/// Configuration and (optionally) a communicator for a series of synthesis or
/// analysis calls. Sessions do not share mutable state, so independent
/// sessions may run concurrently.
#[derive(Clone, Default)]
pub struct Session {
    config: SessionConfig,
    comm: Option<SharedCommunicator>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("distributed", &self.is_distributed())
            .finish()
    }
}

impl Session {
    pub fn new(config: SessionConfig) -> HarmResult<Self> {
        config.validate()?;
        Ok(Self { config, comm: None })
    }

    pub fn distributed(config: SessionConfig, comm: SharedCommunicator) -> HarmResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            comm: Some(comm),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_distributed(&self) -> bool {
        self.comm.is_some()
    }

    pub fn comm(&self) -> &dyn Communicator {
        match &self.comm {
            Some(comm) => comm.as_ref(),
            None => &SINGLE_PROCESS,
        }
    }

    pub fn shared_comm(&self) -> Option<&SharedCommunicator> {
        self.comm.as_ref()
    }

    /// Fresh error context whose distributed flag matches this session.
    pub fn error_context(&self) -> ErrorContext {
        if self.is_distributed() {
            ErrorContext::new_distributed()
        } else {
            ErrorContext::new()
        }
    }

    /// Rejects structures whose distributed flag differs from the session's.
    pub(crate) fn check_distributed(&self, what: &str, distributed: bool) -> HarmResult<()> {
        if distributed == self.is_distributed() {
            return Ok(());
        }
        let (structure, session) = if distributed {
            ("distributed", "non-distributed")
        } else {
            ("non-distributed", "distributed")
        };
        Err(HarmError::distributed(
            "MPI.MIXED",
            format!("{what} is {structure} but the session is {session}"),
        ))
    }

    /// Rejects an error context whose distributed flag differs from the session's.
    pub fn check_context(&self, context: &ErrorContext) -> HarmResult<()> {
        self.check_distributed("the error context", context.is_distributed())
    }
}

#[cfg(test)]
mod tests {
    use super::Session;
    use crate::common::SessionConfig;
    use crate::domain::{ErrorContext, HarmErrorKind};
    use crate::modules::comm::SingleProcess;
    use std::sync::Arc;

    #[test]
    fn context_flag_must_match_session() {
        let local = Session::default();
        assert!(local.check_context(&ErrorContext::new()).is_ok());
        let error = local
            .check_context(&ErrorContext::new_distributed())
            .expect_err("mixed contexts must fail");
        assert_eq!(error.kind(), HarmErrorKind::DistributedConsistency);

        let distributed =
            Session::distributed(SessionConfig::default(), Arc::new(SingleProcess)).expect("session");
        assert!(distributed.error_context().is_distributed());
        assert!(distributed.check_distributed("points", false).is_err());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SessionConfig::default().with_block_multiplier(0);
        assert!(Session::new(config).is_err());
    }
}
