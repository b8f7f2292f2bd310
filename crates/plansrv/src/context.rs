use std::time::{Duration, Instant};

use tracing::{Span, info_span};
use uuid::Uuid;

use crate::types::CompilationUser;

/// State scoped to a single call into the service.
///
/// Passed explicitly to the pipelines. Carries a tracing span so everything
/// logged during the call is tagged with the call id and user.
#[derive(Debug)]
pub struct ExecutionContext {
    call_id: Uuid,
    user: CompilationUser,
    span: Span,
    started: Instant,
}

impl ExecutionContext {
    pub fn new(user: CompilationUser) -> Self {
        let call_id = Uuid::new_v4();
        let span = info_span!(
            "compile_call",
            %call_id,
            user = %user.user,
            session = %user.session,
            database = %user.database,
        );
        ExecutionContext {
            call_id,
            user,
            span,
            started: Instant::now(),
        }
    }

    pub fn call_id(&self) -> Uuid {
        self.call_id
    }

    pub fn user(&self) -> &CompilationUser {
        &self.user
    }

    pub fn database(&self) -> &str {
        &self.user.database
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
