//! ---
//! fx_section: "03-logging"
//! fx_subsection: "module"
//! fx_type: "source"
//! fx_scope: "code"
//! fx_description: "Context-enriched logging macros."
//! fx_version: "v0.1.0"
//! fx_owner: "tbd"
//! ---
//! Every macro accepts an optional leading `context = <LogContext>` argument.

#[doc(hidden)]
pub use tracing as __tracing;

#[doc(hidden)]
#[macro_export]
macro_rules! __fx_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        $crate::macros::__tracing::event!(
            $level,
            vehicle = ctx.vehicle.unwrap_or(""),
            batch = ctx.batch.unwrap_or_default(),
            tick = ctx.tick.unwrap_or_default(),
            mode = ctx.mode.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with fleet context.
#[macro_export]
macro_rules! fx_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__fx_event!($crate::macros::__tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__fx_event!(
            $crate::macros::__tracing::Level::INFO,
            $crate::LogContext::default(),
            $($arg)+
        )
    };
}

/// Emit a debug log enriched with fleet context.
#[macro_export]
macro_rules! fx_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__fx_event!($crate::macros::__tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__fx_event!(
            $crate::macros::__tracing::Level::DEBUG,
            $crate::LogContext::default(),
            $($arg)+
        )
    };
}

/// Emit a warning enriched with fleet context.
#[macro_export]
macro_rules! fx_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__fx_event!($crate::macros::__tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__fx_event!(
            $crate::macros::__tracing::Level::WARN,
            $crate::LogContext::default(),
            $($arg)+
        )
    };
}

/// Emit an error log enriched with fleet context.
#[macro_export]
macro_rules! fx_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__fx_event!($crate::macros::__tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__fx_event!(
            $crate::macros::__tracing::Level::ERROR,
            $crate::LogContext::default(),
            $($arg)+
        )
    };
}
