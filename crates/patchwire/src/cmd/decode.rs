use futures_util::StreamExt;
use patchwire_frame::{decode_reader_with_config, DecoderConfig};
use tokio::io::AsyncRead;

use crate::cmd::{runtime, DecodeArgs};
use crate::exit::{frame_error, io_error, CliResult, SUCCESS};
use crate::output::{print_part, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = DecoderConfig::default();
    if let Some(max) = args.max_part_size {
        config.max_part_size = max;
    }

    runtime()?.block_on(async move {
        match &args.file {
            Some(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|err| io_error(&format!("open {}", path.display()), err))?;
                print_parts(file, &args.boundary, config, format).await
            }
            None => print_parts(tokio::io::stdin(), &args.boundary, config, format).await,
        }
    })
}

async fn print_parts<R>(
    source: R,
    boundary: &str,
    config: DecoderConfig,
    format: OutputFormat,
) -> CliResult<i32>
where
    R: AsyncRead + Unpin,
{
    let mut parts = decode_reader_with_config(source, boundary, config)
        .map_err(|err| frame_error("decode failed", err))?;

    let mut index = 0usize;
    while let Some(part) = parts.next().await {
        let part = part.map_err(|err| frame_error(&format!("part {index}"), err))?;
        print_part(index, &part, format);
        index += 1;
    }
    tracing::debug!(parts = index, "body decoded");
    Ok(SUCCESS)
}
