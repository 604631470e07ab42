use std::io::Result as IoResult;

use super::{FileSys, Ino};
use crate::{
	bcache::BlockCache,
	data::{decode_at, encode_at, InodeType, INDIRECT, NDIRECT},
	err,
};

/// `stat`-style snapshot of a locked inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
	pub dev:   u32,
	pub ino:   u32,
	pub ty:    InodeType,
	pub nlink: i16,
	pub size:  u32,
}

impl<C: BlockCache> FileSys<C> {
	/// Copy stat information out of a locked inode.
	pub fn stati(&self, ino: &Ino) -> Stat {
		Stat {
			dev:   ino.dev,
			ino:   ino.inum,
			ty:    ino.ty,
			nlink: ino.nlink,
			size:  ino.size,
		}
	}

	/// Disk block holding logical block `bn` of `ino`, or `None` for a hole.
	pub(crate) fn bmap(&self, ino: &Ino, bn: u32) -> IoResult<Option<u32>> {
		let nz = |a: u32| if a == 0 { None } else { Some(a) };

		if bn < NDIRECT as u32 {
			return Ok(nz(ino.addrs[bn as usize]));
		}
		let bn = bn - NDIRECT as u32;

		if bn < self.geom.nindirect() {
			let Some(ind) = nz(ino.addrs[INDIRECT]) else {
				return Ok(None);
			};
			let bb = self.fsbread(ino.dev, ind)?;
			let addr: u32 = decode_at(&bb.data, bn as usize * 4);
			self.fsbrelease(bb);
			return Ok(nz(addr));
		}
		panic!("bmap: out of range");
	}

	/// Like `bmap`, but allocates the data block, and the indirect block on
	/// the way to it, as needed.
	pub(crate) fn bmap_alloc(&self, ino: &mut Ino, bn: u32) -> IoResult<u32> {
		if bn < NDIRECT as u32 {
			if ino.addrs[bn as usize] == 0 {
				ino.addrs[bn as usize] = self.balloc(ino.dev)?;
			}
			return Ok(ino.addrs[bn as usize]);
		}
		let bn = bn - NDIRECT as u32;

		if bn < self.geom.nindirect() {
			if ino.addrs[INDIRECT] == 0 {
				ino.addrs[INDIRECT] = self.balloc(ino.dev)?;
			}
			let mut bb = self.fsbread(ino.dev, ino.addrs[INDIRECT])?;
			let mut addr: u32 = decode_at(&bb.data, bn as usize * 4);
			if addr == 0 {
				addr = match self.balloc(ino.dev) {
					Ok(a) => a,
					Err(e) => {
						self.fsbrelease(bb);
						return Err(e);
					}
				};
				encode_at(&mut bb.data, bn as usize * 4, &addr);
				let res = self.fsbwrite(&mut bb);
				self.fsbrelease(bb);
				res?;
			} else {
				self.fsbrelease(bb);
			}
			return Ok(addr);
		}
		panic!("bmap: out of range");
	}

	/// Discard an inode's contents: free every direct block, every block
	/// named by the indirect block, and the indirect block itself.
	pub fn itrunc(&self, ino: &mut Ino) -> IoResult<()> {
		log::trace!("itrunc({})", ino.inum);
		for i in 0..NDIRECT {
			if ino.addrs[i] != 0 {
				self.bfree(ino.dev, ino.addrs[i])?;
				ino.addrs[i] = 0;
			}
		}

		if ino.addrs[INDIRECT] != 0 {
			let bb = self.fsbread(ino.dev, ino.addrs[INDIRECT])?;
			for j in 0..self.geom.nindirect() {
				let addr: u32 = decode_at(&bb.data, j as usize * 4);
				if addr != 0 {
					if let Err(e) = self.bfree(ino.dev, addr) {
						self.fsbrelease(bb);
						return Err(e);
					}
				}
			}
			self.fsbrelease(bb);
			self.bfree(ino.dev, ino.addrs[INDIRECT])?;
			ino.addrs[INDIRECT] = 0;
		}

		ino.size = 0;
		self.iupdate(ino)
	}

	/// Read up to `dst.len()` bytes at byte offset `off`, clamped to the
	/// file's size. Device files delegate to their installed handler.
	pub fn readi(&self, ino: &Ino, dst: &mut [u8], off: u32) -> IoResult<usize> {
		log::trace!("readi({}, {off}, {})", ino.inum, dst.len());
		if ino.ty == InodeType::Dev {
			let Some(dev) = self.devsw.get(ino.major) else {
				return Err(err!(ENODEV));
			};
			return dev.read(ino.minor, dst);
		}

		if off > ino.size {
			return Err(err!(EINVAL));
		}
		let bsize = self.geom.bsize;
		let n = (dst.len() as u64).min((ino.size - off) as u64) as u32;

		let mut tot = 0u32;
		let mut off = off;
		while tot < n {
			let m = (n - tot).min(bsize - off % bsize);
			let seg = &mut dst[tot as usize..(tot + m) as usize];
			match self.bmap(ino, off / bsize)? {
				Some(b) => {
					let bb = self.fsbread(ino.dev, b)?;
					let boff = (off % bsize) as usize;
					seg.copy_from_slice(&bb.data[boff..boff + m as usize]);
					self.fsbrelease(bb);
				}
				// a hole below ip->size reads as zeroes
				None => seg.fill(0),
			}
			tot += m;
			off += m;
		}
		Ok(tot as usize)
	}

	/// Write `src` at byte offset `off`, allocating blocks on demand and
	/// growing the file. Clamped at the largest representable file; the
	/// inode is flushed if the size changed.
	pub fn writei(&self, ino: &mut Ino, src: &[u8], off: u32) -> IoResult<usize> {
		log::trace!("writei({}, {off}, {})", ino.inum, src.len());
		if ino.ty == InodeType::Dev {
			let Some(dev) = self.devsw.get(ino.major) else {
				return Err(err!(ENODEV));
			};
			return dev.write(ino.minor, src);
		}

		let bsize = self.geom.bsize;
		let max = self.geom.maxfile() * bsize;
		if off > max {
			return Err(err!(EFBIG));
		}
		let n = (src.len() as u64).min((max - off) as u64) as u32;

		let mut tot = 0u32;
		let mut off = off;
		while tot < n {
			let m = (n - tot).min(bsize - off % bsize);
			let b = self.bmap_alloc(ino, off / bsize)?;
			let mut bb = self.fsbread(ino.dev, b)?;
			let boff = (off % bsize) as usize;
			bb.data[boff..boff + m as usize]
				.copy_from_slice(&src[tot as usize..(tot + m) as usize]);
			let res = self.fsbwrite(&mut bb);
			self.fsbrelease(bb);
			res?;
			tot += m;
			off += m;
		}

		if tot > 0 && off > ino.size {
			ino.size = off;
			self.iupdate(ino)?;
		}
		Ok(tot as usize)
	}
}

#[cfg(test)]
mod t {
	use super::*;
	use crate::{
		data::{ROOTDEV, ROOTINO},
		fs::testfs,
	};

	const BSIZE: u32 = 1024;

	fn newfile(fs: &testfs::TestFs) -> super::super::Iref {
		let ip = fs.ialloc(ROOTDEV, InodeType::File, ROOTINO).unwrap();
		let mut ino = fs.ilock(&ip).unwrap();
		ino.nlink = 1;
		fs.iupdate(&ino).unwrap();
		fs.iunlock(ino);
		ip
	}

	#[test]
	fn write_then_read_roundtrip() {
		let fs = testfs::mount(BSIZE, 2048, 64);
		let ip = newfile(&fs);
		let mut ino = fs.ilock(&ip).unwrap();

		let pattern: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
		assert_eq!(fs.writei(&mut ino, &pattern, 0).unwrap(), 5000);
		assert_eq!(ino.size, 5000);

		let mut out = vec![0u8; 5000];
		assert_eq!(fs.readi(&ino, &mut out, 0).unwrap(), 5000);
		assert_eq!(out, pattern);

		let st = fs.stati(&ino);
		assert_eq!(st.ino, ino.inum);
		assert_eq!(st.ty, InodeType::File);
		assert_eq!(st.size, 5000);

		// an unaligned slice in the middle
		let mut mid = vec![0u8; 700];
		assert_eq!(fs.readi(&ino, &mut mid, 900).unwrap(), 700);
		assert_eq!(mid[..], pattern[900..1600]);

		fs.iunlockput(ip, ino).unwrap();
	}

	#[test]
	fn read_clamps_at_eof() {
		let fs = testfs::mount(BSIZE, 2048, 64);
		let ip = newfile(&fs);
		let mut ino = fs.ilock(&ip).unwrap();
		fs.writei(&mut ino, b"abc", 0).unwrap();

		let mut out = [0u8; 16];
		assert_eq!(fs.readi(&ino, &mut out, 0).unwrap(), 3);
		assert_eq!(fs.readi(&ino, &mut out, 3).unwrap(), 0);
		assert!(fs.readi(&ino, &mut out, 4).is_err());

		fs.iunlockput(ip, ino).unwrap();
	}

	#[test]
	fn sparse_writes_read_back_zero_filled() {
		let fs = testfs::mount(BSIZE, 2048, 64);
		let ip = newfile(&fs);
		let mut ino = fs.ilock(&ip).unwrap();

		// touch only block 3; blocks 0..3 stay holes
		fs.writei(&mut ino, b"x", 3 * BSIZE).unwrap();
		assert_eq!(ino.size, 3 * BSIZE + 1);
		assert_eq!(ino.addrs[0], 0);
		assert_ne!(ino.addrs[3], 0);

		let mut out = vec![0xffu8; BSIZE as usize];
		assert_eq!(fs.readi(&ino, &mut out, 0).unwrap(), BSIZE as usize);
		assert!(out.iter().all(|&b| b == 0));

		fs.iunlockput(ip, ino).unwrap();
	}

	#[test]
	fn boundary_offsets_around_the_indirect_block() {
		let fs = testfs::mount(BSIZE, 2048, 64);
		let nindirect = fs.geom().nindirect();
		let ip = newfile(&fs);
		let mut ino = fs.ilock(&ip).unwrap();

		// last direct byte
		fs.writei(&mut ino, b"a", NDIRECT as u32 * BSIZE - 1).unwrap();
		assert_eq!(ino.addrs[INDIRECT], 0);

		// first indirect byte
		fs.writei(&mut ino, b"b", NDIRECT as u32 * BSIZE).unwrap();
		assert_ne!(ino.addrs[INDIRECT], 0);

		// last representable byte
		let last = (NDIRECT as u32 + nindirect) * BSIZE - 1;
		fs.writei(&mut ino, b"c", last).unwrap();
		assert_eq!(ino.size, last + 1);

		// past the end: clamped to nothing
		assert_eq!(fs.writei(&mut ino, b"d", last + 1).unwrap(), 0);
		assert!(fs.writei(&mut ino, b"e", last + 2).is_err());

		let mut out = [0u8; 1];
		fs.readi(&ino, &mut out, last).unwrap();
		assert_eq!(&out, b"c");

		fs.iunlockput(ip, ino).unwrap();
	}

	#[test]
	fn thirteenth_block_lands_in_the_indirect_slot() {
		let fs = testfs::mount(BSIZE, 2048, 64);
		let ip = newfile(&fs);
		let mut ino = fs.ilock(&ip).unwrap();

		let data = vec![0x5au8; 13 * BSIZE as usize];
		assert_eq!(fs.writei(&mut ino, &data, 0).unwrap(), data.len());
		let ind = ino.addrs[INDIRECT];
		assert_ne!(ind, 0);

		// addrs[INDIRECT]'s first slot carries logical block 12
		let bb = fs.fsbread(ROOTDEV, ind).unwrap();
		let first: u32 = decode_at(&bb.data, 0);
		fs.fsbrelease(bb);
		assert_eq!(Some(first), fs.bmap(&ino, 12).unwrap());

		fs.iunlockput(ip, ino).unwrap();
	}

	#[test]
	fn truncate_returns_every_block() {
		let fs = testfs::mount(BSIZE, 2048, 64);
		let ip = newfile(&fs);
		let mut ino = fs.ilock(&ip).unwrap();

		let data = vec![0xa5u8; 13 * BSIZE as usize];
		fs.writei(&mut ino, &data, 0).unwrap();
		let lowest = ino.addrs[0];

		fs.itrunc(&mut ino).unwrap();
		assert_eq!(ino.size, 0);
		assert_eq!(ino.addrs, [0; crate::data::NADDRS]);

		// all 14 blocks (13 data + indirect) came back to the allocator
		assert_eq!(fs.balloc(ROOTDEV).unwrap(), lowest);

		fs.iunlockput(ip, ino).unwrap();
	}

	#[test]
	fn device_files_delegate_to_the_switch() {
		use std::sync::Arc;

		struct Echo;
		impl crate::dev::Device for Echo {
			fn read(&self, minor: i16, dst: &mut [u8]) -> IoResult<usize> {
				dst.fill(minor as u8);
				Ok(dst.len())
			}

			fn write(&self, _minor: i16, src: &[u8]) -> IoResult<usize> {
				Ok(src.len())
			}
		}

		let fs = testfs::mount(BSIZE, 2048, 64);
		let ip = fs.ialloc(ROOTDEV, InodeType::Dev, ROOTINO).unwrap();
		let mut ino = fs.ilock(&ip).unwrap();
		ino.nlink = 1;
		ino.major = 3;
		ino.minor = 9;
		fs.iupdate(&ino).unwrap();

		// no handler yet
		let mut out = [0u8; 4];
		assert!(fs.readi(&ino, &mut out, 0).is_err());

		fs.install_device(3, Arc::new(Echo));
		assert_eq!(fs.readi(&ino, &mut out, 0).unwrap(), 4);
		assert_eq!(out, [9; 4]);
		assert_eq!(fs.writei(&mut ino, b"hi", 0).unwrap(), 2);

		fs.iunlockput(ip, ino).unwrap();
	}
}
