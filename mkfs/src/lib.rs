//! Off-line builder for cgfs disk images.
//!
//! Produces the layout the kernel core expects: block 0 reserved, the
//! superblock in block 1, and per cylinder group two shadow blocks, the
//! group's inode blocks, its bitmap block, then data blocks. File data is
//! carved sequentially out of group 0's data region.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Seek, SeekFrom, Write};

use cgfs::{
	decode_at, encode_at, name_bytes, Dinode, Dirent, Geom, InodeType, Superblock, DINODE_SIZE,
	DIRENT_SIZE, DISK_SECTOR_SIZE, INDIRECT, NDIRECT, ROOTINO,
};

macro_rules! iobail {
	($kind:expr, $($tk:tt)+) => {
		return Err(IoError::new($kind, format!($($tk)+)))
	};
}

pub struct ImageBuilder<T: Read + Write + Seek> {
	img:       T,
	geom:      Geom,
	size:      u32,
	ninodes:   u32,
	ncg:       u32,
	freeinode: u32,
	freeblock: u32,
}

impl<T: Read + Write + Seek> ImageBuilder<T> {
	/// Format `img` as an empty filesystem of `size` blocks of `bsize`
	/// bytes with `ninodes` inodes, containing just the root directory.
	pub fn new(img: T, bsize: u32, size: u32, ninodes: u32) -> IoResult<Self> {
		if !bsize.is_power_of_two() || bsize < DISK_SECTOR_SIZE || bsize % DINODE_SIZE != 0 {
			iobail!(ErrorKind::InvalidInput, "bad block size {bsize}");
		}
		let geom = Geom::new(bsize);
		let ncg = size.div_ceil(geom.cgsize());
		if size <= geom.datastart(0) + 1 {
			iobail!(
				ErrorKind::InvalidInput,
				"{size} blocks leave no data space after {} metadata blocks",
				geom.datastart(0)
			);
		}
		if ninodes < 2 || ninodes > ncg * geom.ipcg() {
			iobail!(ErrorKind::InvalidInput, "bad inode count {ninodes}");
		}

		let mut b = Self {
			img,
			geom,
			size,
			ninodes,
			ncg,
			freeinode: 1,
			freeblock: geom.datastart(0),
		};

		// zero the whole image
		let zeroes = vec![0u8; bsize as usize];
		for bno in 0..size {
			b.wblock(bno, &zeroes)?;
		}

		let sb = Superblock {
			size,
			nblocks: size - ncg * (geom.ibpcg() + 3),
			ninodes,
			blocksize: bsize,
		};
		let mut buf = vec![0u8; bsize as usize];
		encode_at(&mut buf, 0, &sb);
		b.wblock(1, &buf)?;
		log::info!(
			"{size} blocks: {} data, {ninodes} inodes in {ncg} cylinder groups",
			sb.nblocks
		);

		let root = b.ialloc(InodeType::Dir)?;
		assert_eq!(root, ROOTINO);
		b.append_dirent(ROOTINO, b".", ROOTINO)?;
		b.append_dirent(ROOTINO, b"..", ROOTINO)?;
		Ok(b)
	}

	fn wblock(&mut self, bno: u32, buf: &[u8]) -> IoResult<()> {
		assert_eq!(buf.len(), self.geom.bsize as usize);
		self.img
			.seek(SeekFrom::Start(bno as u64 * self.geom.bsize as u64))?;
		self.img.write_all(buf)
	}

	fn rblock(&mut self, bno: u32, buf: &mut [u8]) -> IoResult<()> {
		assert_eq!(buf.len(), self.geom.bsize as usize);
		self.img
			.seek(SeekFrom::Start(bno as u64 * self.geom.bsize as u64))?;
		self.img.read_exact(buf)
	}

	fn rinode(&mut self, inum: u32) -> IoResult<Dinode> {
		let mut buf = vec![0u8; self.geom.bsize as usize];
		self.rblock(self.geom.iblock(inum), &mut buf)?;
		Ok(decode_at(&buf, self.geom.inode_off(inum)))
	}

	fn winode(&mut self, inum: u32, din: &Dinode) -> IoResult<()> {
		let mut buf = vec![0u8; self.geom.bsize as usize];
		let bno = self.geom.iblock(inum);
		self.rblock(bno, &mut buf)?;
		encode_at(&mut buf, self.geom.inode_off(inum), din);
		self.wblock(bno, &buf)
	}

	/// Take the next data block. The builder only writes into group 0's
	/// data region; crossing its end is a bounds violation.
	fn balloc_data(&mut self) -> IoResult<u32> {
		let end = self.geom.cgsize().min(self.size);
		if self.freeblock >= end {
			return Err(IoError::from_raw_os_error(libc::ENOSPC));
		}
		let b = self.freeblock;
		self.freeblock += 1;
		Ok(b)
	}

	/// Claim the next inode, type set and a single link, everything else
	/// zero.
	fn ialloc(&mut self, ty: InodeType) -> IoResult<u32> {
		if self.freeinode >= self.ninodes {
			return Err(IoError::from_raw_os_error(libc::ENOSPC));
		}
		let inum = self.freeinode;
		self.freeinode += 1;

		let mut din = Dinode::ZERO;
		din.ty = ty.raw();
		din.nlink = 1;
		self.winode(inum, &din)?;
		Ok(inum)
	}

	/// Append `data` to inode `inum`, growing through the direct slots into
	/// the single-indirect block.
	pub fn iappend(&mut self, inum: u32, data: &[u8]) -> IoResult<()> {
		let g = self.geom;
		let bsize = g.bsize;
		let mut din = self.rinode(inum)?;
		let mut off = din.size;
		let mut buf = vec![0u8; bsize as usize];

		let mut rest = data;
		while !rest.is_empty() {
			let fbn = off / bsize;
			if fbn >= g.maxfile() {
				iobail!(ErrorKind::InvalidInput, "inode {inum} outgrew the block map");
			}

			let x = if fbn < NDIRECT as u32 {
				if din.addrs[fbn as usize] == 0 {
					din.addrs[fbn as usize] = self.balloc_data()?;
				}
				din.addrs[fbn as usize]
			} else {
				if din.addrs[INDIRECT] == 0 {
					din.addrs[INDIRECT] = self.balloc_data()?;
				}
				let ind = din.addrs[INDIRECT];
				self.rblock(ind, &mut buf)?;
				let ioff = ((fbn - NDIRECT as u32) * 4) as usize;
				let mut x: u32 = decode_at(&buf, ioff);
				if x == 0 {
					x = self.balloc_data()?;
					encode_at(&mut buf, ioff, &x);
					self.wblock(ind, &buf)?;
				}
				x
			};

			let n1 = (rest.len() as u32).min((fbn + 1) * bsize - off);
			self.rblock(x, &mut buf)?;
			let boff = (off - fbn * bsize) as usize;
			buf[boff..boff + n1 as usize].copy_from_slice(&rest[..n1 as usize]);
			self.wblock(x, &buf)?;

			off += n1;
			rest = &rest[n1 as usize..];
		}

		din.size = off;
		self.winode(inum, &din)
	}

	fn append_dirent(&mut self, dir: u32, name: &[u8], inum: u32) -> IoResult<()> {
		let de = Dirent {
			inum: inum as u16,
			name: name_bytes(name),
		};
		let mut buf = [0u8; DIRENT_SIZE as usize];
		encode_at(&mut buf, 0, &de);
		self.iappend(dir, &buf)
	}

	/// Copy a regular file into the root directory, returning its inode
	/// number. Names longer than a directory entry are truncated.
	pub fn add_file(&mut self, name: &[u8], data: &[u8]) -> IoResult<u32> {
		if name.is_empty() || name.contains(&b'/') {
			iobail!(ErrorKind::InvalidInput, "bad file name {:?}", String::from_utf8_lossy(name));
		}
		let inum = self.ialloc(InodeType::File)?;
		self.append_dirent(ROOTINO, name, inum)?;
		self.iappend(inum, data)?;
		log::debug!(
			"{} -> inode {inum}, {} bytes",
			String::from_utf8_lossy(name),
			data.len()
		);
		Ok(inum)
	}

	/// Round the root directory up to a whole block, emit every group's
	/// bitmap, and flush.
	pub fn finish(mut self) -> IoResult<T> {
		let g = self.geom;
		let mut din = self.rinode(ROOTINO)?;
		din.size = (din.size / g.bsize + 1) * g.bsize;
		self.winode(ROOTINO, &din)?;

		assert!(self.freeblock <= g.cgsize().min(self.size));
		log::info!("first {} blocks in use", self.freeblock);

		let mut buf = vec![0u8; g.bsize as usize];
		for cg in 0..self.ncg {
			buf.fill(0);
			let base = cg * g.cgsize();
			if g.bblock(base) >= self.size {
				// tail group too small to hold its own metadata
				continue;
			}
			let used = if cg == 0 {
				self.freeblock
			} else {
				g.ibpcg() + 3
			};
			for b in 0..used {
				buf[(b / 8) as usize] |= 1 << (b % 8);
			}
			self.wblock(g.bblock(base), &buf)?;
		}

		self.img.flush()?;
		Ok(self.img)
	}
}
