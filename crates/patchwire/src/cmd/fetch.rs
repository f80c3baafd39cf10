use std::sync::{Arc, Mutex, PoisonError};

use patchwire_cache::{
    CacheConfig, CacheError, OperationKey, Phase, QueryResult, ReadResult, ResultCache,
};
use patchwire_transport::{HttpTransport, HttpTransportConfig, OperationRequest};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cmd::{parse_duration, runtime, FetchArgs};
use crate::exit::{
    cache_error, io_error, transport_error, CliError, CliResult, FAILURE, INTERRUPTED, SUCCESS,
    USAGE,
};
use crate::output::{print_result, OutputFormat};

pub fn run(args: FetchArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let request = build_request(&args)?;

    let mut config = HttpTransportConfig::new(&args.url).with_timeout(timeout);
    for header in &args.headers {
        let (name, value) = parse_header(header)?;
        config = config.with_header(name, value);
    }

    runtime()?.block_on(async move {
        let transport =
            HttpTransport::new(config).map_err(|err| transport_error("client setup failed", &err))?;
        let cache = ResultCache::new(
            Arc::new(transport),
            CacheConfig::default().with_read_timeout(timeout),
        );

        let operation = OperationKey::new(&request.query, request.variables.as_ref());
        info!(url = %args.url, operation = operation.short(), "fetching");

        let read = cache.execute(request);
        tokio::select! {
            code = settle(&cache, &operation, read, args.watch, format) => code,
            _ = tokio::signal::ctrl_c() => {
                cache.dispose(&operation);
                Err(CliError::new(INTERRUPTED, "interrupted"))
            }
        }
    })
}

/// Wait for the root result and then for the operation to finish, printing
/// snapshots along the way when `watch` is set.
async fn settle(
    cache: &ResultCache,
    operation: &OperationKey,
    read: ReadResult<QueryResult>,
    watch: bool,
    format: OutputFormat,
) -> CliResult<i32> {
    let failure = if read.is_pending() {
        observe(cache, operation, watch, format)?
    } else {
        Arc::default()
    };

    let initial = read
        .resolve()
        .await
        .map_err(|err| cache_error("fetch failed", err))?;
    let phase = cache
        .settled(operation)
        .await
        .map_err(|err| cache_error("fetch failed", err))?;
    debug!(operation = operation.short(), %phase, "operation settled");

    match phase {
        Phase::Errored => {
            let err = failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .unwrap_or_else(|| CacheError::Disposed(operation.clone()));
            return Err(cache_error("fetch failed", err));
        }
        Phase::Disposed => {
            return Err(CliError::new(
                FAILURE,
                format!("fetch failed: operation {operation} was disposed"),
            ));
        }
        _ => {}
    }

    let result = cache.read_query(operation).unwrap_or(initial);
    if !watch {
        print_result(operation.as_str(), None, result.tree(), format);
    }

    if result.errors().is_empty() {
        return Ok(SUCCESS);
    }
    for error in result.errors() {
        warn!(message = %error.message, "result carries an error");
    }
    Ok(FAILURE)
}

/// Subscribe to every payload of `operation`, printing snapshots when
/// `watch` is set. The returned slot receives the terminal error, if any.
fn observe(
    cache: &ResultCache,
    operation: &OperationKey,
    watch: bool,
    format: OutputFormat,
) -> CliResult<Arc<Mutex<Option<CacheError>>>> {
    let failure: Arc<Mutex<Option<CacheError>>> = Arc::default();
    let slot = Arc::clone(&failure);
    let label = operation.to_string();
    cache
        .watch(operation, move |delivery| match delivery {
            Ok(update) if watch => {
                print_result(&label, Some(update.payload.path()), &update.tree, format);
            }
            Ok(_) => {}
            Err(err) => {
                *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.clone());
            }
        })
        .map_err(|err| cache_error("watch failed", err))?;
    Ok(failure)
}

fn build_request(args: &FetchArgs) -> CliResult<OperationRequest> {
    let query = match (&args.query, &args.query_file) {
        (Some(query), _) => query.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .map_err(|err| io_error(&format!("read {}", path.display()), err))?,
        (None, None) => {
            return Err(CliError::new(USAGE, "one of --query or --query-file is required"));
        }
    };

    let mut request = OperationRequest::new(query);
    if let Some(raw) = &args.variables {
        let variables: Value = serde_json::from_str(raw)
            .map_err(|err| CliError::new(USAGE, format!("invalid --variables JSON: {err}")))?;
        if !variables.is_object() && !variables.is_null() {
            return Err(CliError::new(USAGE, "--variables must be a JSON object"));
        }
        request = request.with_variables(variables);
    }
    if let Some(name) = &args.operation_name {
        request = request.with_operation_name(name);
    }
    Ok(request)
}

fn parse_header(raw: &str) -> CliResult<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| CliError::new(USAGE, format!("header must be `name: value`: {raw}")))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(CliError::new(USAGE, format!("header name is empty: {raw}")));
    }
    Ok((name.to_string(), value.trim().to_string()))
}
