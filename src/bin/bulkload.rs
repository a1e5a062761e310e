use std::io::{self, Write};

use clap::Parser;

use entity_bulkload::loader::resolve_destination;
use entity_bulkload::mapping::MappingSource;
use entity_bulkload::sample::{SampleEntity, SampleEntityBuilder, sample_context};
use entity_bulkload::{BulkLoadSettings, BulkLoader, MemoryTransport, PgBulkCopy, PlanRegistry};

#[derive(Parser, Debug)]
#[command(
    name = "bulkload",
    about = "Generate sample entities and bulk load them into PostgreSQL"
)]
struct Args {
    /// Number of sample entities to generate.
    #[arg(long, default_value_t = 1000)]
    count: usize,

    /// Destination table. Defaults to the record type name.
    #[arg(long)]
    table: Option<String>,

    /// Rows per committed batch (0 loads everything in one batch).
    #[arg(long)]
    batch_size: Option<usize>,

    /// Create the destination table if it does not exist.
    #[arg(long)]
    create_table: bool,

    /// Use the explicit sample mapping instead of conventions.
    #[arg(long)]
    explicit_mapping: bool,

    /// Load into memory and print the rows as JSON lines instead.
    #[arg(long)]
    dry_run: bool,

    /// Seed for the sample generator.
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    entity_bulkload::init_logger();

    let args = Args::parse();

    let mut settings = BulkLoadSettings::from_env();
    if let Some(batch_size) = args.batch_size {
        settings.batch_size = batch_size;
    }

    let mut builder = match args.seed {
        Some(seed) => SampleEntityBuilder::with_seed(seed),
        None => SampleEntityBuilder::new(),
    };
    let records = builder.create_many(args.count);

    let context = args.explicit_mapping.then(sample_context);
    let source = MappingSource::new(context.as_ref(), settings.mapping);
    let plan = PlanRegistry::global().plan_for::<SampleEntity>(source)?;
    let destination = resolve_destination(args.table.as_deref(), plan.schema().type_name());

    if args.dry_run {
        let transport = MemoryTransport::new();
        let loader = BulkLoader::new(transport.clone()).with_settings(settings);
        let summary = loader
            .bulk_insert::<SampleEntity, _>(&records, Some(&destination), context.as_ref())
            .await?;

        let mut stdout = io::stdout().lock();
        if let Some(table) = transport.table(&summary.destination) {
            for row in &table.rows {
                let object: serde_json::Map<String, serde_json::Value> = table
                    .column_names()
                    .zip(row)
                    .map(|(name, value)| -> Result<_, serde_json::Error> {
                        Ok((name.to_string(), serde_json::to_value(value)?))
                    })
                    .collect::<Result<_, _>>()?;
                writeln!(stdout, "{}", serde_json::Value::Object(object))?;
            }
        }
        let counters = transport.counters();
        log::info!(
            "dry run wrote {} rows in {} batches",
            counters.row_writes,
            counters.batches
        );
        return Ok(());
    }

    let database_url = std::env::var("DATABASE_URL")?;
    let transport = PgBulkCopy::connect(&database_url).await?;

    if args.create_table {
        transport.create_table(&destination, plan.schema()).await?;
    }

    let loader = BulkLoader::new(transport).with_settings(settings);
    let summary = loader
        .bulk_insert::<SampleEntity, _>(&records, Some(&destination), context.as_ref())
        .await?;

    writeln!(io::stdout(), "{}", serde_json::to_string(&summary)?)?;

    Ok(())
}
