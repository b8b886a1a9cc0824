use vpf::{
    build_feature_schema, init_logging, log_app_start, logging_config_from_env,
    pipeline_config_from_env, read_feature_table, run_pipeline,
};

const PREVIEW_ROWS: usize = 10;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let config = pipeline_config_from_env();
    let report = run_pipeline(&config)?;

    println!(
        "feature table written to {}: {} rows over window {} -> {} (replaced {} rows)",
        config.output_store.display(),
        report.build.output_rows,
        report.build.window.start,
        report.build.window.end,
        report.sink.rows_replaced
    );

    let schema = build_feature_schema(&config.features);
    let rows = read_feature_table(&config.output_store, &schema)?;

    println!(
        "\n{}",
        schema
            .columns
            .iter()
            .map(|column| column.name.as_str())
            .collect::<Vec<_>>()
            .join(" | ")
    );
    for row in rows.iter().take(PREVIEW_ROWS) {
        println!(
            "{} | {} | {} | {} | {} | {} | {} | {} | {:.2}",
            row.day,
            row.user_id,
            row.position,
            row.value_prop,
            row.was_clicked,
            row.prints_3w_before,
            row.taps_3w_before,
            row.pays_3w_before,
            row.amount_3w_before
        );
    }

    Ok(())
}
