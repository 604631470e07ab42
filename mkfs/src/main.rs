use std::fs::File;

use anyhow::{Context, Result};
use cgfs_mkfs::ImageBuilder;
use clap::Parser;

use crate::cli::Cli;

mod cli;

fn main() -> Result<()> {
	let cli = Cli::parse();

	env_logger::builder()
		.filter_level(cli.verbose.log_level_filter())
		.init();

	let img = File::options()
		.read(true)
		.write(true)
		.create(true)
		.truncate(true)
		.open(&cli.image)
		.with_context(|| format!("creating {}", cli.image.display()))?;

	let mut fs = ImageBuilder::new(img, cli.blocksize, cli.total_blocks, cli.ninodes)?;

	for path in &cli.files {
		let name = path
			.file_name()
			.with_context(|| format!("{} has no file name", path.display()))?
			.as_encoded_bytes();
		// build systems prefix binaries with '_' to keep them runnable
		let name = name.strip_prefix(b"_").unwrap_or(name);
		let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
		fs.add_file(name, &data)
			.with_context(|| format!("adding {}", path.display()))?;
	}

	fs.finish()?;
	Ok(())
}
