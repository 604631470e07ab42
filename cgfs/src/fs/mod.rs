use std::{
	io::Result as IoResult,
	sync::{Arc, Mutex},
};

mod balloc;
mod blkio;
mod dir;
mod ialloc;
mod icache;
mod inode;
mod path;
#[cfg(test)]
pub(crate) mod testfs;

pub use icache::{Ino, Iref};
pub use inode::Stat;
pub use path::skipelem;

use crate::{
	bcache::BlockCache,
	data::{decode_at, Dinode, Geom, InodeType, Superblock},
	dev::{DevTable, Device},
};

/// (INTERNAL) Constructs an [`std::io::Error`] from an `errno`.
#[macro_export]
macro_rules! err {
	($name:ident) => {
		std::io::Error::from_raw_os_error(libc::$name)
	};
}

/// Per-cylinder-group allocation statistics, kept in memory only and used to
/// spread new directories across groups.
#[derive(Debug, Clone, Copy, Default)]
struct CgStat {
	usedinodes: u32,
	dircount:   u32,
}

/// The filesystem core over a block cache.
///
/// One `FileSys` serves one mounted device. All methods take `&self`; the
/// inode cache carries its own locking, so a `FileSys` can be shared across
/// threads.
pub struct FileSys<C: BlockCache> {
	cache:   C,
	dev:     u32,
	sb:      Superblock,
	geom:    Geom,
	cgcount: u32,
	cgstats: Mutex<Vec<CgStat>>,
	icache:  icache::InodeCache,
	devsw:   DevTable,
}

impl<C: BlockCache> FileSys<C> {
	/// Mount device `dev`: read the superblock, then prime the per-group
	/// statistics by scanning every inode block.
	///
	/// `bsize` is the block size the device was formatted with; a superblock
	/// that declares a different one is rejected.
	pub fn mount(cache: C, dev: u32, bsize: u32) -> IoResult<Self> {
		let geom = Geom::new(bsize);
		let mut fs = Self {
			cache,
			dev,
			sb: Superblock::default(),
			geom,
			cgcount: 0,
			cgstats: Mutex::new(Vec::new()),
			icache: icache::InodeCache::new(),
			devsw: DevTable::new(),
		};

		fs.sb = fs.readsb()?;
		let sb = &fs.sb;
		log::debug!("superblock: {sb:?}");
		log::info!("block size: {}", geom.bsize);
		log::info!("blocks: {} ({} data)", sb.size, sb.nblocks);
		log::info!("inodes: {}", sb.ninodes);

		macro_rules! sbassert {
			($e:expr) => {
				if !($e) {
					log::error!("superblock corrupted: {}", stringify!($e));
					return Err(err!(EIO));
				}
			};
		}

		sbassert!(sb.size > 1);
		sbassert!(sb.nblocks > 0 && sb.nblocks < sb.size);
		sbassert!(sb.ninodes > 1);
		sbassert!(sb.blocksize == 0 || sb.blocksize == geom.bsize);

		let cgsize = geom.cgsize();
		fs.cgcount = fs.sb.nblocks / cgsize + (fs.sb.nblocks % cgsize > 0) as u32;
		log::info!("cylinder groups: {}", fs.cgcount);

		fs.cgstats = Mutex::new(fs.scan_inodes()?);
		Ok(fs)
	}

	fn readsb(&self) -> IoResult<Superblock> {
		let bb = self.fsbread(self.dev, 1)?;
		let sb = decode_at(&bb.data, 0);
		self.fsbrelease(bb);
		Ok(sb)
	}

	/// Walk the inode blocks once, counting live inodes and directories per
	/// cylinder group.
	fn scan_inodes(&self) -> IoResult<Vec<CgStat>> {
		let g = self.geom;
		let mut stats = vec![CgStat::default(); self.cgcount as usize];

		let mut inum = 0;
		while inum < self.sb.ninodes {
			let bb = self.fsbread(self.dev, g.iblock(inum))?;
			for i in 0..g.ipb() {
				if inum + i >= self.sb.ninodes {
					break;
				}
				let din: Dinode = decode_at(&bb.data, g.inode_off(inum + i));
				if din.ty == 0 {
					continue;
				}
				let cg = ((inum + i) / g.ipcg()) as usize;
				if cg >= stats.len() {
					log::warn!("inode {} beyond the last cylinder group", inum + i);
					continue;
				}
				stats[cg].usedinodes += 1;
				if din.ty == InodeType::Dir.raw() {
					stats[cg].dircount += 1;
				}
			}
			self.fsbrelease(bb);
			inum += g.ipb();
		}

		Ok(stats)
	}

	/// The mounted superblock.
	pub fn superblock(&self) -> &Superblock {
		&self.sb
	}

	pub fn geom(&self) -> Geom {
		self.geom
	}

	/// The device this filesystem was mounted from.
	pub fn device(&self) -> u32 {
		self.dev
	}

	/// Install the handlers for device-file major number `major`.
	pub fn install_device(&self, major: i16, dev: Arc<dyn Device>) {
		self.devsw.install(major, dev);
	}

	/// Unmount, handing the block cache back.
	pub fn into_cache(self) -> C {
		self.cache
	}
}
