// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

/// Installs a global `tracing` subscriber that writes through the test harness
///
/// The level defaults to `DEBUG` and can be overridden with `DAMA_LOG`.
pub fn init_tracing() {
    if cfg!(any(miri, fuzzing)) {
        return;
    }

    use std::sync::Once;

    static TRACING: Once = Once::new();

    TRACING.call_once(|| {
        let default_level = if std::env::var("CI").is_ok() {
            tracing::Level::INFO
        } else {
            tracing::Level::DEBUG
        };

        let env_filter = tracing_subscriber::EnvFilter::builder()
            .with_default_directive(default_level.into())
            .with_env_var("DAMA_LOG")
            .from_env_lossy();

        // a global subscriber may already be installed
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .compact()
            .with_test_writer()
            .try_init();
    });
}
