use patchwire_frame::MultipartWriter;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::cmd::{runtime, EncodeArgs};
use crate::exit::{frame_error, io_error, CliError, CliResult, DATA_INVALID, SUCCESS};

pub fn run(args: EncodeArgs) -> CliResult<i32> {
    runtime()?.block_on(async move {
        match &args.file {
            Some(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|err| io_error(&format!("open {}", path.display()), err))?;
                encode_lines(file, &args.boundary).await
            }
            None => encode_lines(tokio::io::stdin(), &args.boundary).await,
        }
    })
}

/// Read one JSON payload per line and write each as a part. Blank lines are
/// skipped; a line that is not JSON aborts before anything more is written.
async fn encode_lines<R>(source: R, boundary: &str) -> CliResult<i32>
where
    R: AsyncRead + Unpin,
{
    let mut writer = MultipartWriter::new(tokio::io::stdout(), boundary)
        .map_err(|err| frame_error("encode failed", err))?;

    let mut lines = BufReader::new(source).lines();
    let mut line_no = 0usize;
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|err| io_error("read failed", err))?
    {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let payload: Value = serde_json::from_str(line).map_err(|err| {
            CliError::new(DATA_INVALID, format!("line {line_no}: invalid JSON: {err}"))
        })?;
        writer
            .write_json(&payload)
            .await
            .map_err(|err| frame_error("write failed", err))?;
    }

    let parts = writer.parts_written();
    writer
        .finish()
        .await
        .map_err(|err| frame_error("write failed", err))?;
    tracing::debug!(parts, "body encoded");
    Ok(SUCCESS)
}
