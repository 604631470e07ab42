use std::io::Result as IoResult;

use super::{FileSys, Iref};
use crate::{
	bcache::BlockCache,
	data::{InodeType, DIRSIZ, ROOTINO},
	err,
};

/// Split the next path element off `path`.
///
/// Strips leading slashes, copies the element into `name` (truncated to
/// `DIRSIZ` bytes, zero-padded otherwise), strips the slashes after it, and
/// returns the remainder. `None` when the path is empty or all slashes; an
/// empty remainder means the element was the last one.
///
/// ```
/// # use cgfs::skipelem;
/// let mut name = [0u8; 14];
/// assert_eq!(skipelem(b"a/bb/c", &mut name), Some(&b"bb/c"[..]));
/// assert_eq!(&name[..2], &b"a\0"[..]);
/// assert_eq!(skipelem(b"///a//bb", &mut name), Some(&b"bb"[..]));
/// assert_eq!(skipelem(b"", &mut name), None);
/// assert_eq!(skipelem(b"////", &mut name), None);
/// ```
pub fn skipelem<'a>(path: &'a [u8], name: &mut [u8; DIRSIZ]) -> Option<&'a [u8]> {
	let mut i = 0;
	while i < path.len() && path[i] == b'/' {
		i += 1;
	}
	if i == path.len() {
		return None;
	}

	let start = i;
	while i < path.len() && path[i] != b'/' {
		i += 1;
	}
	let elem = &path[start..i];
	let n = elem.len().min(DIRSIZ);
	name.fill(0);
	name[..n].copy_from_slice(&elem[..n]);

	while i < path.len() && path[i] == b'/' {
		i += 1;
	}
	Some(&path[i..])
}

impl<C: BlockCache> FileSys<C> {
	/// Iterative path walk: lock the current directory, look the next
	/// element up, drop the parent, continue with the child. At most one
	/// inode is locked at a time.
	fn namex(
		&self,
		cwd: Option<&Iref>,
		path: &[u8],
		parent: bool,
		name: &mut [u8; DIRSIZ],
	) -> IoResult<Iref> {
		let mut ip = if path.first() == Some(&b'/') {
			self.iget(self.dev, ROOTINO)
		} else {
			match cwd {
				Some(cwd) => self.idup(cwd),
				None => self.iget(self.dev, ROOTINO),
			}
		};

		let mut rest = path;
		while let Some(next) = skipelem(rest, name) {
			rest = next;

			let ino = match self.ilock(&ip) {
				Ok(ino) => ino,
				Err(e) => {
					self.iput(ip)?;
					return Err(e);
				}
			};
			if ino.ty != InodeType::Dir {
				self.iunlockput(ip, ino)?;
				return Err(err!(ENOTDIR));
			}
			if parent && rest.is_empty() {
				// stop one level early, unlocked but referenced
				self.iunlock(ino);
				return Ok(ip);
			}
			match self.dirlookup(&ino, name) {
				Ok(Some((next_ip, _))) => {
					self.iunlockput(ip, ino)?;
					ip = next_ip;
				}
				Ok(None) => {
					self.iunlockput(ip, ino)?;
					return Err(err!(ENOENT));
				}
				Err(e) => {
					self.iunlockput(ip, ino)?;
					return Err(e);
				}
			}
		}

		if parent {
			// the path named the starting point itself
			self.iput(ip)?;
			return Err(err!(ENOENT));
		}
		Ok(ip)
	}

	/// Resolve `path` to an inode reference. Relative paths start at `cwd`,
	/// or at the root when no working directory is given.
	pub fn namei(&self, cwd: Option<&Iref>, path: &[u8]) -> IoResult<Iref> {
		log::trace!("namei({:?})", String::from_utf8_lossy(path));
		let mut name = [0u8; DIRSIZ];
		self.namex(cwd, path, false, &mut name)
	}

	/// Resolve `path` to its parent directory, also returning the final
	/// path element.
	pub fn nameiparent(&self, cwd: Option<&Iref>, path: &[u8]) -> IoResult<(Iref, [u8; DIRSIZ])> {
		let mut name = [0u8; DIRSIZ];
		let ip = self.namex(cwd, path, true, &mut name)?;
		Ok((ip, name))
	}
}
