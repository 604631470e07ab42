use std::io::Result as IoResult;

use super::{FileSys, Ino, Iref};
use crate::{
	bcache::BlockCache,
	data::{decode_at, encode_at, Dirent, InodeType, DIRENT_SIZE, DIRSIZ},
	err,
};

impl<C: BlockCache> FileSys<C> {
	/// Look for an entry named `name` in directory `dp`, which the caller
	/// holds locked. On a hit, returns a reference to the named inode and
	/// the entry's byte offset within the directory.
	pub fn dirlookup(&self, dp: &Ino, name: &[u8; DIRSIZ]) -> IoResult<Option<(Iref, u32)>> {
		if dp.ty != InodeType::Dir {
			panic!("dirlookup not DIR");
		}

		let bsize = self.geom.bsize;
		let mut off = 0;
		while off < dp.size {
			let Some(b) = self.bmap(dp, off / bsize)? else {
				log::error!("dirlookup({}): hole at offset {off}", dp.inum);
				return Err(err!(EIO));
			};
			let bb = self.fsbread(dp.dev, b)?;
			for i in 0..bsize / DIRENT_SIZE {
				let de: Dirent = decode_at(&bb.data, (i * DIRENT_SIZE) as usize);
				if de.inum == 0 {
					continue;
				}
				if de.name == *name {
					self.fsbrelease(bb);
					let inum = de.inum as u32;
					return Ok(Some((self.iget(dp.dev, inum), off + i * DIRENT_SIZE)));
				}
			}
			self.fsbrelease(bb);
			off += bsize;
		}
		Ok(None)
	}

	/// Add the entry `(name, inum)` to directory `dp`, reusing the first
	/// free slot and extending the directory only when there is none.
	pub fn dirlink(&self, dp: &mut Ino, name: &[u8; DIRSIZ], inum: u32) -> IoResult<()> {
		log::trace!("dirlink({}, {inum})", dp.inum);
		if let Some((ip, _)) = self.dirlookup(dp, name)? {
			self.iput(ip)?;
			return Err(err!(EEXIST));
		}

		let mut off = 0;
		while off < dp.size {
			let mut buf = [0u8; DIRENT_SIZE as usize];
			if self.readi(dp, &mut buf, off)? != buf.len() {
				panic!("dirlink read");
			}
			let de: Dirent = decode_at(&buf, 0);
			if de.inum == 0 {
				break;
			}
			off += DIRENT_SIZE;
		}

		let de = Dirent {
			inum: inum as u16,
			name: *name,
		};
		let mut buf = [0u8; DIRENT_SIZE as usize];
		encode_at(&mut buf, 0, &de);
		if self.writei(dp, &buf, off)? != buf.len() {
			panic!("dirlink");
		}
		Ok(())
	}

	/// Remove the entry named `name` from `dp`, leaving a free slot behind,
	/// and hand back the reference to the unlinked inode. The caller drops
	/// the inode's link count and puts the reference.
	pub fn dirunlink(&self, dp: &mut Ino, name: &[u8; DIRSIZ]) -> IoResult<Iref> {
		log::trace!("dirunlink({})", dp.inum);
		let Some((ip, off)) = self.dirlookup(dp, name)? else {
			return Err(err!(ENOENT));
		};

		let buf = [0u8; DIRENT_SIZE as usize];
		match self.writei(dp, &buf, off) {
			Ok(n) if n == buf.len() => Ok(ip),
			Ok(_) => panic!("dirunlink"),
			Err(e) => {
				self.iput(ip)?;
				Err(e)
			}
		}
	}
}
