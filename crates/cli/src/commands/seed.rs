use crate::commands::{current_thread_runtime, load_config, CommandResult};
use salescope_db::{connect_with_settings, migrations, DemoSalesDataset, SeedResult};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match current_thread_runtime("seed") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seeded = DemoSalesDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verified = DemoSalesDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        pool.close().await;
        if verified {
            Ok(seeded)
        } else {
            Err(("seed_verification", verification_message(&seeded), 6u8))
        }
    });

    match result {
        Ok(seeded) => CommandResult::success(
            "seed",
            format!(
                "demo sales dataset loaded: {} products, {} monthly rows",
                seeded.products, seeded.rows
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn verification_message(seeded: &SeedResult) -> String {
    format!(
        "seed verification failed: expected at least {} products and {} rows, found {} and {}",
        DemoSalesDataset::EXPECTED_PRODUCTS,
        DemoSalesDataset::EXPECTED_ROWS,
        seeded.products,
        seeded.rows
    )
}
