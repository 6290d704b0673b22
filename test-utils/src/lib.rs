//! `test-utils` is used for testing in both `throttle-lib` and `throttle-bin`.
//! This crate does not depend on either of them, else we would get dependency cycles.
//! Macros are used instead, so that the importer is responsible for providing the
//! dependencies (`wiremock` and `http`).

/// Create a mock web server, which responds with a predefined status when
/// handling a matching request
#[macro_export]
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from($status));
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::method("GET")).respond_with(template).mount(&mock_server).await;
        mock_server
    }};
}

/// Create a mock web server which answers every `GET` with `$status`, but only
/// after `$delay` has passed.
///
/// Useful to keep requests in flight long enough to observe concurrency
/// limits, deadlines and cancellation.
#[macro_export]
macro_rules! delayed_mock_server {
    ($status:expr, $delay:expr $(, $func:tt ($($arg:expr),*))*) => {
        $crate::mock_server!($status, set_delay($delay) $(, $func ($($arg),*))*)
    };
}

/// Gets the "main" binary name (e.g. `throttle`)
#[macro_export]
macro_rules! main_command {
    () => {
        Command::cargo_bin(env!("CARGO_PKG_NAME")).expect("Couldn't get cargo package name")
    };
}
