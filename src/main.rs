use std::env::args;
use std::fs::OpenOptions;

use anyhow::{Context, Result};
use sqlog::{FileBlockIo, Reader, TypeTag, Writer, WriterConfig};

/// `sqlog <path> write <message...>` appends one row (level=0, text message)
/// to `path`, creating and finalising it if it doesn't already exist.
/// `sqlog <path> read <row-id>` prints the message at that row.
fn main() -> Result<()> {
    env_logger::init();

    let mut argv = args().skip(1);
    let path = argv.next().context("usage: sqlog <path> <write|read> ...")?;
    let command = argv.next().context("usage: sqlog <path> <write|read> ...")?;

    match command.as_str() {
        "write" => {
            let message = argv.collect::<Vec<_>>().join(" ");
            write_message(&path, &message)?;
        }
        "read" => {
            let rowid: u64 = argv
                .next()
                .context("usage: sqlog <path> read <row-id>")?
                .parse()
                .context("row-id must be an integer")?;
            read_message(&path, rowid)?;
        }
        other => anyhow::bail!("unknown command {other:?}, expected write or read"),
    }

    Ok(())
}

fn write_message(path: &str, message: &str) -> Result<()> {
    let exists = std::path::Path::new(path).exists();
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)
        .with_context(|| format!("opening {path}"))?;
    let file_len = file.metadata()?.len();
    let io = FileBlockIo::new(file);

    let config = WriterConfig::new(4096, 2).table_name("log");
    let mut writer = if exists && file_len > 0 {
        Writer::init_for_append(io, config, file_len)?
    } else {
        Writer::write_init(io, config)?
    };

    let level = 0i64.to_be_bytes();
    let rowid = writer.append_row_with_values(&[(TypeTag::Int, &level), (TypeTag::Text, message.as_bytes())])?;
    writer.finalize()?;
    println!("wrote row {rowid}");
    Ok(())
}

fn read_message(path: &str, rowid: u64) -> Result<()> {
    let file = OpenOptions::new().read(true).open(path).with_context(|| format!("opening {path}"))?;
    let io = FileBlockIo::new(file);
    let mut reader = Reader::read_init(io)?;
    reader.srch_row_by_id(rowid)?;
    let message = reader.read_col_val(1)?;
    println!("{message:?}");
    Ok(())
}
