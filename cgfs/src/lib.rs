mod bcache;
mod data;
mod dev;
mod fs;

pub use crate::{
	bcache::{Backend, BlockCache, Buf, SectorCache},
	data::{
		decode_at, encode_at, name_bytes, Dinode, Dirent, Geom, InodeType, Superblock, BSIZE,
		DINODE_SIZE, DIRENT_SIZE, DIRSIZ, DISK_SECTOR_SIZE, INDIRECT, NADDRS, NDEV, NDIRECT,
		NINODE, ROOTDEV, ROOTINO,
	},
	dev::Device,
	fs::{skipelem, FileSys, Ino, Iref, Stat},
};
