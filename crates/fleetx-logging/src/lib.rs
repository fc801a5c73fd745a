//! ---
//! fx_section: "03-logging"
//! fx_subsection: "module"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "Structured logging context and helpers."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Every event carries the same four fields (`vehicle`, `batch`, `tick`,
//! `mode`) so JSON log lines from the producer and the consumer can be
//! joined on them. Unset fields are emitted as empty strings or zero.

use tracing::Level;

pub mod macros;

/// Fields attached to every event emitted through the `fx_*!` macros.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LogContext<'a> {
    /// Vehicle the event concerns.
    pub vehicle: Option<&'a str>,
    /// Batch the event concerns.
    pub batch: Option<u64>,
    /// Engine tick counter.
    pub tick: Option<u64>,
    /// Vehicle mode, or the process role for process-wide events.
    pub mode: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Context with no fields set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the vehicle.
    pub fn with_vehicle(self, vehicle: &'a str) -> Self {
        Self {
            vehicle: Some(vehicle),
            ..self
        }
    }

    /// Set the batch.
    pub fn with_batch(self, batch: u64) -> Self {
        Self {
            batch: Some(batch),
            ..self
        }
    }

    /// Set the tick.
    pub fn with_tick(self, tick: u64) -> Self {
        Self {
            tick: Some(tick),
            ..self
        }
    }

    /// Set the mode or role.
    pub fn with_mode(self, mode: &'a str) -> Self {
        Self {
            mode: Some(mode),
            ..self
        }
    }
}

/// Outcome of a process lifecycle event; selects the level it is logged at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// Completed normally. Logged at INFO.
    Success,
    /// Completed, but some work was lost on the way. Logged at WARN.
    Degraded,
    /// Failed or aborted. Logged at ERROR.
    Fault,
}

impl SystemEventOutcome {
    /// Label written to the `outcome` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Degraded => "degraded",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a process lifecycle event such as startup or shutdown.
pub fn log_system_event(
    context: &LogContext,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    macro_rules! emit {
        ($level:expr) => {
            tracing::event!(
                $level,
                event,
                outcome = outcome.as_str(),
                vehicle = context.vehicle.unwrap_or(""),
                batch = context.batch.unwrap_or_default(),
                tick = context.tick.unwrap_or_default(),
                mode = context.mode.unwrap_or(""),
                message = %message
            )
        };
    }
    match outcome {
        SystemEventOutcome::Success => emit!(Level::INFO),
        SystemEventOutcome::Degraded => emit!(Level::WARN),
        SystemEventOutcome::Fault => emit!(Level::ERROR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::fmt;

    fn capture() {
        let _ = fmt()
            .with_max_level(Level::DEBUG)
            .with_test_writer()
            .try_init();
    }

    #[test]
    fn builders_only_touch_their_field() {
        let base = LogContext::new().with_vehicle("V002").with_mode("cruising");
        let ctx = base.with_batch(3).with_tick(11);
        assert_eq!(ctx.vehicle, Some("V002"));
        assert_eq!(ctx.batch, Some(3));
        assert_eq!(ctx.tick, Some(11));
        assert_eq!(ctx.mode, Some("cruising"));
        assert_eq!(base.batch, None);
    }

    #[test]
    fn macros_accept_context_and_format_args() {
        capture();
        let ctx = LogContext::new().with_vehicle("V001").with_batch(7);
        fx_info!(context = ctx, "vehicle online");
        fx_debug!("no context {}", 1);
        fx_warn!(context = ctx, "retrying read {}", 2);
        fx_error!(context = ctx, "write failed: {}", "disk full");
    }

    #[test]
    fn every_outcome_has_a_label() {
        capture();
        let ctx = LogContext::new().with_mode("producer");
        for outcome in [
            SystemEventOutcome::Success,
            SystemEventOutcome::Degraded,
            SystemEventOutcome::Fault,
        ] {
            log_system_event(&ctx, "shutdown", "test", outcome);
            assert!(!outcome.as_str().is_empty());
        }
    }
}
