use std::path::PathBuf;

use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};

/// Build a cgfs disk image from a set of regular files.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
	/// Path of the image file to create
	pub image: PathBuf,

	/// Filesystem block size in bytes (a power of two, at least one sector)
	pub blocksize: u32,

	/// Total image size in blocks
	pub total_blocks: u32,

	/// Files to copy into the root directory. A leading '_' in the file
	/// name is stripped.
	pub files: Vec<PathBuf>,

	/// Number of inodes to provision
	#[arg(long, default_value_t = 200)]
	pub ninodes: u32,

	#[command(flatten)]
	pub verbose: Verbosity<WarnLevel>,
}
