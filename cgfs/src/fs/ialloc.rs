use std::io::Result as IoResult;

use super::{FileSys, Iref};
use crate::{
	bcache::BlockCache,
	data::{decode_at, encode_at, Dinode, InodeType},
};

impl<C: BlockCache> FileSys<C> {
	/// Pick the cylinder group a new inode should land in.
	///
	/// Directories go to the group with the fewest directories among groups
	/// whose inode usage is below the mean, spreading subtrees across the
	/// disk; everything else is colocated with its parent directory.
	fn bestgroup(&self, ty: InodeType, parent: u32) -> u32 {
		if ty != InodeType::Dir {
			return parent / self.geom.ipcg();
		}

		let stats = self.cgstats.lock().unwrap();
		let total: u32 = stats.iter().map(|s| s.usedinodes).sum();
		let mean = total as f64 / stats.len() as f64;

		let mut lowest: Option<usize> = None;
		for (i, s) in stats.iter().enumerate() {
			if (s.usedinodes as f64) < mean
				&& lowest.map_or(true, |l| s.dircount < stats[l].dircount)
			{
				lowest = Some(i);
			}
		}
		lowest.unwrap_or(0) as u32
	}

	/// Allocate a free on-disk inode of type `ty` and return a cache
	/// reference to it.
	///
	/// Only the type is set on disk; the caller locks the inode and fills in
	/// the rest. Inode allocation never touches the block bitmap. Running
	/// out of inodes is fatal.
	pub fn ialloc(&self, dev: u32, ty: InodeType, parent: u32) -> IoResult<Iref> {
		let g = self.geom;
		let mut start = self.bestgroup(ty, parent) * g.ipcg();
		// inum 0 is never handed out; a start beyond the provisioned inodes
		// degenerates to a full scan
		if start == 0 || start >= self.sb.ninodes {
			start = 1;
		}

		for inum in (start..self.sb.ninodes).chain(1..start) {
			let mut bb = self.fsbread(dev, g.iblock(inum))?;
			let off = g.inode_off(inum);
			let din: Dinode = decode_at(&bb.data, off);
			if din.ty != 0 {
				self.fsbrelease(bb);
				continue;
			}

			let mut din = Dinode::ZERO;
			din.ty = ty.raw();
			encode_at(&mut bb.data, off, &din);
			let res = self.fsbwrite(&mut bb);
			self.fsbrelease(bb);
			res?;

			let cg = (inum / g.ipcg()) as usize;
			let mut stats = self.cgstats.lock().unwrap();
			if cg < stats.len() {
				stats[cg].usedinodes += 1;
				if ty == InodeType::Dir {
					stats[cg].dircount += 1;
				}
			}
			drop(stats);

			log::trace!("ialloc({dev}, {ty:?}, {parent}) = {inum}");
			return Ok(self.iget(dev, inum));
		}
		panic!("ialloc: no inodes");
	}
}
