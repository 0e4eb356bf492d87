use crate::commands::{current_thread_runtime, load_config, CommandResult};
use salescope_core::config::SessionBackend;
use salescope_db::{connect_with_settings, migrations};

pub fn run() -> CommandResult {
    let config = match load_config("migrate") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match current_thread_runtime("migrate") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let mut targets = vec![config.database.url.clone()];
    if config.session.backend == SessionBackend::Sqlite && config.session.url != config.database.url
    {
        targets.push(config.session.url.clone());
    }

    let result = runtime.block_on(async {
        for url in &targets {
            let pool = connect_with_settings(
                url,
                config.database.max_connections,
                config.database.timeout_secs,
            )
            .await
            .map_err(|error| ("db_connectivity", format!("{url}: {error}"), 4u8))?;
            migrations::run_pending(&pool)
                .await
                .map_err(|error| ("migration", format!("{url}: {error}"), 5u8))?;
            pool.close().await;
        }
        Ok::<(), (&'static str, String, u8)>(())
    });

    match result {
        Ok(()) => CommandResult::success(
            "migrate",
            format!("applied pending migrations to {} database(s)", targets.len()),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
