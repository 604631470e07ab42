use std::io::Result as IoResult;

use super::FileSys;
use crate::{
	bcache::{BlockCache, Buf},
	data::DISK_SECTOR_SIZE,
};

/// One logical block's bytes plus the locked sector buffers backing them.
///
/// Produced by `fsbread`; must be handed back to `fsbrelease` exactly once.
/// `fsbwrite` pushes the bytes to disk but keeps the sectors held.
pub(crate) struct BlockBuf {
	pub data: Vec<u8>,
	held:     Vec<Buf>,
}

impl<C: BlockCache> FileSys<C> {
	/// Read logical block `block`: acquire each constituent sector in
	/// ascending order and assemble their contents.
	pub(crate) fn fsbread(&self, dev: u32, block: u32) -> IoResult<BlockBuf> {
		let secsz = DISK_SECTOR_SIZE as usize;
		let spb = self.geom.secperblock();
		let first = block * spb;

		let mut bb = BlockBuf {
			data: vec![0u8; self.geom.bsize as usize],
			held: Vec::with_capacity(spb as usize),
		};
		for i in 0..spb {
			let buf = match self.cache.bread(dev, first + i) {
				Ok(buf) => buf,
				Err(e) => {
					self.fsbrelease(bb);
					return Err(e);
				}
			};
			let off = i as usize * secsz;
			bb.data[off..off + secsz].copy_from_slice(&buf.data);
			bb.held.push(buf);
		}
		Ok(bb)
	}

	/// Copy the block bytes back into the held sectors and write them out
	/// synchronously.
	pub(crate) fn fsbwrite(&self, bb: &mut BlockBuf) -> IoResult<()> {
		let secsz = DISK_SECTOR_SIZE as usize;
		for (i, buf) in bb.held.iter_mut().enumerate() {
			let off = i * secsz;
			buf.data.copy_from_slice(&bb.data[off..off + secsz]);
			self.cache.bwrite(buf)?;
		}
		Ok(())
	}

	/// Release the held sectors in reverse acquisition order, respecting the
	/// block cache's lock order.
	pub(crate) fn fsbrelease(&self, mut bb: BlockBuf) {
		while let Some(buf) = bb.held.pop() {
			self.cache.brelse(buf);
		}
	}
}
