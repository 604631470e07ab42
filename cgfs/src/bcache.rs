use std::{
	collections::HashSet,
	fs::File,
	io::{Read, Result as IoResult, Seek, SeekFrom, Write},
	path::Path,
	sync::{Condvar, Mutex},
};

use crate::data::{DISK_SECTOR_SIZE, ROOTDEV};

pub trait Backend: Read + Write + Seek + Send {}

impl<T: Read + Write + Seek + Send> Backend for T {}

/// One sector's worth of bytes, held exclusively by the caller until
/// `brelse`.
#[derive(Debug)]
pub struct Buf {
	pub dev:    u32,
	pub sector: u32,
	pub data:   [u8; DISK_SECTOR_SIZE as usize],
}

/// The block-cache interface the filesystem core is written against.
///
/// `bread` hands out a locked sector buffer and may block until the previous
/// holder releases it. `bwrite` pushes the buffer to the device before
/// returning. `brelse` gives the buffer up and wakes waiters.
pub trait BlockCache: Send + Sync {
	fn bread(&self, dev: u32, sector: u32) -> IoResult<Buf>;
	fn bwrite(&self, buf: &Buf) -> IoResult<()>;
	fn brelse(&self, buf: Buf);
}

/// Sector cache over a single seekable device image.
///
/// Per-sector exclusivity is a locked-sector set guarded by a mutex and a
/// condvar; the sector contents live in the backing stream, re-read on every
/// acquisition and written through on `bwrite`.
pub struct SectorCache<T: Backend> {
	dev:  u32,
	disk: Mutex<T>,
	held: Mutex<HashSet<u32>>,
	free: Condvar,
}

impl SectorCache<File> {
	/// Open an image file as device `ROOTDEV`.
	pub fn open(path: &Path, rw: bool) -> IoResult<Self> {
		let file = File::options().read(true).write(rw).open(path)?;
		Ok(SectorCache::new(ROOTDEV, file))
	}
}

impl<T: Backend> SectorCache<T> {
	pub fn new(dev: u32, disk: T) -> Self {
		Self {
			dev,
			disk: Mutex::new(disk),
			held: Mutex::new(HashSet::new()),
			free: Condvar::new(),
		}
	}

	/// Give the backing stream back, e.g. to inspect raw image bytes.
	pub fn into_inner(self) -> T {
		self.disk.into_inner().unwrap()
	}

	fn load(&self, buf: &mut Buf) -> IoResult<()> {
		let mut disk = self.disk.lock().unwrap();
		disk.seek(SeekFrom::Start(
			buf.sector as u64 * DISK_SECTOR_SIZE as u64,
		))?;
		disk.read_exact(&mut buf.data)
	}
}

impl<T: Backend> BlockCache for SectorCache<T> {
	fn bread(&self, dev: u32, sector: u32) -> IoResult<Buf> {
		if dev != self.dev {
			panic!("bread: unknown device {dev}");
		}

		{
			let mut held = self.held.lock().unwrap();
			while held.contains(&sector) {
				held = self.free.wait(held).unwrap();
			}
			held.insert(sector);
		}

		let mut buf = Buf {
			dev,
			sector,
			data: [0u8; DISK_SECTOR_SIZE as usize],
		};
		if let Err(e) = self.load(&mut buf) {
			self.brelse(buf);
			return Err(e);
		}
		Ok(buf)
	}

	fn bwrite(&self, buf: &Buf) -> IoResult<()> {
		let mut disk = self.disk.lock().unwrap();
		disk.seek(SeekFrom::Start(
			buf.sector as u64 * DISK_SECTOR_SIZE as u64,
		))?;
		disk.write_all(&buf.data)?;
		disk.flush()
	}

	fn brelse(&self, buf: Buf) {
		let mut held = self.held.lock().unwrap();
		if !held.remove(&buf.sector) {
			panic!("brelse: sector {} not held", buf.sector);
		}
		drop(held);
		self.free.notify_all();
	}
}

#[cfg(test)]
mod t {
	use std::io::Cursor;

	use super::*;

	fn harness(nsectors: u32) -> SectorCache<Cursor<Vec<u8>>> {
		let img = vec![0u8; (nsectors * DISK_SECTOR_SIZE) as usize];
		SectorCache::new(ROOTDEV, Cursor::new(img))
	}

	#[test]
	fn write_then_read() {
		let bc = harness(8);
		let mut buf = bc.bread(ROOTDEV, 3).unwrap();
		buf.data.fill(0x5a);
		bc.bwrite(&buf).unwrap();
		bc.brelse(buf);

		let buf = bc.bread(ROOTDEV, 3).unwrap();
		assert!(buf.data.iter().all(|&b| b == 0x5a));
		bc.brelse(buf);

		// neighboring sector untouched
		let buf = bc.bread(ROOTDEV, 4).unwrap();
		assert!(buf.data.iter().all(|&b| b == 0));
		bc.brelse(buf);
	}

	#[test]
	fn distinct_sectors_held_together() {
		let bc = harness(8);
		let a = bc.bread(ROOTDEV, 0).unwrap();
		let b = bc.bread(ROOTDEV, 1).unwrap();
		bc.brelse(b);
		bc.brelse(a);
	}

	#[test]
	fn sector_lock_excludes_other_threads() {
		let bc = harness(8);
		let buf = bc.bread(ROOTDEV, 2).unwrap();

		std::thread::scope(|s| {
			let t = s.spawn(|| {
				// blocks until the main thread releases sector 2
				let b = bc.bread(ROOTDEV, 2).unwrap();
				bc.brelse(b);
			});
			std::thread::sleep(std::time::Duration::from_millis(20));
			bc.brelse(buf);
			t.join().unwrap();
		});
	}

	#[test]
	#[should_panic(expected = "not held")]
	fn double_release_panics() {
		let bc = harness(8);
		let buf = bc.bread(ROOTDEV, 0).unwrap();
		let stale = Buf {
			dev:    buf.dev,
			sector: buf.sector,
			data:   buf.data,
		};
		bc.brelse(buf);
		bc.brelse(stale);
	}

	#[test]
	fn open_file_image() {
		let f = tempfile::NamedTempFile::new().unwrap();
		f.as_file()
			.set_len(8 * DISK_SECTOR_SIZE as u64)
			.unwrap();
		let bc = SectorCache::open(f.path(), true).unwrap();
		let mut buf = bc.bread(ROOTDEV, 7).unwrap();
		buf.data[0] = 0xa5;
		bc.bwrite(&buf).unwrap();
		bc.brelse(buf);

		let buf = bc.bread(ROOTDEV, 7).unwrap();
		assert_eq!(buf.data[0], 0xa5);
		bc.brelse(buf);
	}
}
