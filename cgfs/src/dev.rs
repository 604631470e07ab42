use std::{
	io::Result as IoResult,
	sync::{Arc, RwLock},
};

use crate::data::NDEV;

/// Handlers for a device file's major number. Install with
/// [`crate::FileSys::install_device`] before the first access through a
/// `T_DEV` inode.
pub trait Device: Send + Sync {
	fn read(&self, minor: i16, dst: &mut [u8]) -> IoResult<usize>;
	fn write(&self, minor: i16, src: &[u8]) -> IoResult<usize>;
}

/// The device switch: one slot per major number.
pub(crate) struct DevTable {
	slots: RwLock<[Option<Arc<dyn Device>>; NDEV]>,
}

impl DevTable {
	pub fn new() -> Self {
		Self {
			slots: RwLock::new(std::array::from_fn(|_| None)),
		}
	}

	pub fn install(&self, major: i16, dev: Arc<dyn Device>) {
		let mut slots = self.slots.write().unwrap();
		if major < 0 || major as usize >= NDEV {
			panic!("devsw: major {major} out of range");
		}
		slots[major as usize] = Some(dev);
	}

	pub fn get(&self, major: i16) -> Option<Arc<dyn Device>> {
		if major < 0 || major as usize >= NDEV {
			return None;
		}
		self.slots.read().unwrap()[major as usize].clone()
	}
}
