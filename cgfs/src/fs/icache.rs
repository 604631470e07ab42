use std::{
	io::Result as IoResult,
	sync::{Condvar, Mutex},
};

use super::FileSys;
use crate::{
	bcache::BlockCache,
	data::{decode_at, encode_at, Dinode, InodeType, NADDRS, NINODE},
};

/// One cache slot. `(dev, inum)` is the slot's identity whenever `refc > 0`;
/// everything else is garbage until `valid` is set by the first lock.
#[derive(Clone, Copy)]
struct Slot {
	dev:   u32,
	inum:  u32,
	refc:  u32,
	busy:  bool,
	valid: bool,
	din:   Dinode,
}

const EMPTY: Slot = Slot {
	dev:   0,
	inum:  0,
	refc:  0,
	busy:  false,
	valid: false,
	din:   Dinode::ZERO,
};

/// The in-memory inode table.
///
/// The mutex is the cache's bookkeeping lock: held only for O(1) slot
/// manipulation, never across disk I/O. Exclusive use of a slot's inode
/// fields is the `busy` flag; waiters park on the condvar and are woken by
/// whoever clears it.
pub(crate) struct InodeCache {
	slots: Mutex<[Slot; NINODE]>,
	wake:  Condvar,
}

impl InodeCache {
	pub fn new() -> Self {
		Self {
			slots: Mutex::new([EMPTY; NINODE]),
			wake:  Condvar::new(),
		}
	}
}

/// A counted reference to a cached inode.
///
/// Holding an `Iref` keeps the slot alive; it says nothing about the inode's
/// fields, which may only be inspected through [`FileSys::ilock`]. Every
/// `Iref` must eventually go back through [`FileSys::iput`].
#[must_use = "inode references must be released with iput"]
#[derive(Debug)]
pub struct Iref {
	pub(crate) slot: usize,
	pub dev:  u32,
	pub inum: u32,
}

/// A locked inode: the holder has exclusive use of the fields until
/// [`FileSys::iunlock`] writes them back to the cache.
#[derive(Debug)]
pub struct Ino {
	pub(crate) slot: usize,
	pub dev:   u32,
	pub inum:  u32,
	pub ty:    InodeType,
	pub major: i16,
	pub minor: i16,
	pub nlink: i16,
	pub size:  u32,
	pub addrs: [u32; NADDRS],
}

impl Ino {
	pub(crate) fn din(&self) -> Dinode {
		Dinode {
			ty:    self.ty.raw(),
			major: self.major,
			minor: self.minor,
			nlink: self.nlink,
			size:  self.size,
			addrs: self.addrs,
		}
	}

	fn from_din(slot: usize, dev: u32, inum: u32, din: &Dinode) -> Self {
		let ty = match InodeType::from_raw(din.ty) {
			Some(ty) => ty,
			None => panic!("ilock: no type"),
		};
		Self {
			slot,
			dev,
			inum,
			ty,
			major: din.major,
			minor: din.minor,
			nlink: din.nlink,
			size: din.size,
			addrs: din.addrs,
		}
	}
}

impl<C: BlockCache> FileSys<C> {
	/// Find or create the cache slot for `(dev, inum)` and take a reference
	/// on it. The returned inode is unlocked and possibly not yet read from
	/// disk.
	pub fn iget(&self, dev: u32, inum: u32) -> Iref {
		let mut slots = self.icache.slots.lock().unwrap();

		let mut empty = None;
		for (i, s) in slots.iter_mut().enumerate() {
			if s.refc > 0 && s.dev == dev && s.inum == inum {
				s.refc += 1;
				return Iref { slot: i, dev, inum };
			}
			if empty.is_none() && s.refc == 0 {
				empty = Some(i);
			}
		}

		let Some(i) = empty else {
			panic!("iget: no inodes");
		};
		slots[i] = Slot {
			dev,
			inum,
			refc: 1,
			..EMPTY
		};
		Iref { slot: i, dev, inum }
	}

	/// Take another reference on `ip`. Valid without holding the lock.
	pub fn idup(&self, ip: &Iref) -> Iref {
		let mut slots = self.icache.slots.lock().unwrap();
		slots[ip.slot].refc += 1;
		Iref {
			slot: ip.slot,
			dev:  ip.dev,
			inum: ip.inum,
		}
	}

	/// Lock inode `ip`, reading it from disk if this is the first lock since
	/// it entered the cache. Sleeps while another holder has it.
	pub fn ilock(&self, ip: &Iref) -> IoResult<Ino> {
		let valid = {
			let mut slots = self.icache.slots.lock().unwrap();
			{
				let s = &slots[ip.slot];
				if s.refc < 1 || s.dev != ip.dev || s.inum != ip.inum {
					panic!("ilock");
				}
			}
			while slots[ip.slot].busy {
				slots = self.icache.wake.wait(slots).unwrap();
			}
			slots[ip.slot].busy = true;
			slots[ip.slot].valid
		};

		if !valid {
			let bb = match self.fsbread(ip.dev, self.geom.iblock(ip.inum)) {
				Ok(bb) => bb,
				Err(e) => {
					self.clear_busy(ip.slot);
					return Err(e);
				}
			};
			let din: Dinode = decode_at(&bb.data, self.geom.inode_off(ip.inum));
			self.fsbrelease(bb);

			let mut slots = self.icache.slots.lock().unwrap();
			slots[ip.slot].din = din;
			slots[ip.slot].valid = true;
			if din.ty == 0 {
				panic!("ilock: no type");
			}
			return Ok(Ino::from_din(ip.slot, ip.dev, ip.inum, &din));
		}

		let din = self.icache.slots.lock().unwrap()[ip.slot].din;
		Ok(Ino::from_din(ip.slot, ip.dev, ip.inum, &din))
	}

	/// Unlock `ino`, publishing its (possibly modified) fields back to the
	/// cache slot and waking waiters. In-memory only; `iupdate` persists.
	pub fn iunlock(&self, ino: Ino) {
		let mut slots = self.icache.slots.lock().unwrap();
		let s = &mut slots[ino.slot];
		if !s.busy || s.refc < 1 {
			panic!("iunlock");
		}
		s.din = ino.din();
		s.busy = false;
		drop(slots);
		self.icache.wake.notify_all();
	}

	/// Copy a changed inode out to its disk block.
	pub fn iupdate(&self, ino: &Ino) -> IoResult<()> {
		log::trace!("iupdate({})", ino.inum);
		self.write_dinode(ino.dev, ino.inum, &ino.din())
	}

	pub(crate) fn write_dinode(&self, dev: u32, inum: u32, din: &Dinode) -> IoResult<()> {
		let mut bb = self.fsbread(dev, self.geom.iblock(inum))?;
		encode_at(&mut bb.data, self.geom.inode_off(inum), din);
		let res = self.fsbwrite(&mut bb);
		self.fsbrelease(bb);
		res
	}

	/// Drop a reference. If this was the last reference to an unlinked
	/// inode, truncate it and free its on-disk slot; this is the only place
	/// inodes are destroyed.
	pub fn iput(&self, ip: Iref) -> IoResult<()> {
		let mut slots = self.icache.slots.lock().unwrap();
		{
			let s = &slots[ip.slot];
			if s.refc < 1 || s.dev != ip.dev || s.inum != ip.inum {
				panic!("iput");
			}
		}

		let mut res = Ok(());
		let s = &mut slots[ip.slot];
		if s.refc == 1 && s.valid && s.din.nlink == 0 {
			if s.busy {
				panic!("iput busy");
			}
			s.busy = true;
			let din = s.din;
			drop(slots);

			let mut ino = Ino::from_din(ip.slot, ip.dev, ip.inum, &din);
			res = self.itrunc(&mut ino).and_then(|()| {
				let mut din = ino.din();
				din.ty = 0;
				self.write_dinode(ip.dev, ip.inum, &din)
			});

			slots = self.icache.slots.lock().unwrap();
			let s = &mut slots[ip.slot];
			s.din = Dinode::ZERO;
			s.busy = false;
			self.icache.wake.notify_all();
		}
		slots[ip.slot].refc -= 1;
		res
	}

	/// Common idiom: unlock, then put.
	pub fn iunlockput(&self, ip: Iref, ino: Ino) -> IoResult<()> {
		self.iunlock(ino);
		self.iput(ip)
	}

	fn clear_busy(&self, slot: usize) {
		let mut slots = self.icache.slots.lock().unwrap();
		slots[slot].busy = false;
		drop(slots);
		self.icache.wake.notify_all();
	}

	#[cfg(test)]
	pub(crate) fn refcount(&self, ip: &Iref) -> u32 {
		self.icache.slots.lock().unwrap()[ip.slot].refc
	}
}
