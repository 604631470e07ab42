//! In-memory image fixture for the unit tests: formats the smallest legal
//! filesystem (superblock, root directory, group-0 bitmap) on a
//! `Cursor<Vec<u8>>` and mounts it.

use std::io::Cursor;

use super::FileSys;
use crate::{
	bcache::SectorCache,
	data::{encode_at, name_bytes, Dinode, Dirent, Geom, InodeType, Superblock, ROOTDEV, ROOTINO},
};

pub(crate) type TestFs = FileSys<SectorCache<Cursor<Vec<u8>>>>;

pub(crate) fn image(bsize: u32, size: u32, ninodes: u32) -> Vec<u8> {
	let g = Geom::new(bsize);
	let bs = bsize as usize;
	let mut img = vec![0u8; (size as usize) * bs];

	let ncg = size.div_ceil(g.cgsize());
	let rootblk = g.datastart(0);
	let sb = Superblock {
		size,
		nblocks: size - ncg * (g.ibpcg() + 3),
		ninodes,
		blocksize: bsize,
	};
	encode_at(&mut img, bs, &sb);

	// root directory inode, one block holding "." and ".."
	let mut din = Dinode::ZERO;
	din.ty = InodeType::Dir.raw();
	din.nlink = 1;
	din.size = bsize;
	din.addrs[0] = rootblk;
	let off = g.iblock(ROOTINO) as usize * bs + g.inode_off(ROOTINO);
	encode_at(&mut img, off, &din);

	let dot = Dirent {
		inum: ROOTINO as u16,
		name: name_bytes(b"."),
	};
	let dotdot = Dirent {
		inum: ROOTINO as u16,
		name: name_bytes(b".."),
	};
	encode_at(&mut img, rootblk as usize * bs, &dot);
	encode_at(&mut img, rootblk as usize * bs + 16, &dotdot);

	// per-group bitmaps: metadata everywhere, plus the root block in group 0
	for cg in 0..ncg {
		let base = cg * g.cgsize();
		let map = g.bblock(base) as usize * bs;
		let used = if cg == 0 {
			rootblk + 1 - base
		} else {
			g.ibpcg() + 3
		};
		for b in 0..used {
			img[map + (b / 8) as usize] |= 1 << (b % 8);
		}
	}

	img
}

pub(crate) fn mount(bsize: u32, size: u32, ninodes: u32) -> TestFs {
	let cache = SectorCache::new(ROOTDEV, Cursor::new(image(bsize, size, ninodes)));
	FileSys::mount(cache, ROOTDEV, bsize).expect("mounting the fixture image")
}
