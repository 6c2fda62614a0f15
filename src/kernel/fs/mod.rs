// src/kernel/fs/mod.rs

//! Read-only block-indexed filesystem, mounted from a boot module.
//!
//! On-disk layout (4 KiB blocks):
//!
//! * block 0 - boot block: directory-entry count, inode count, data-block
//!   count, then up to 63 directory entries of 64 bytes each
//!   (32-byte name, 4-byte type, 4-byte inode index, 24 reserved);
//! * blocks 1..=N - inodes: 4-byte file size followed by data-block
//!   indices;
//! * remaining blocks - file data.
//!
//! The filesystem is a set of typed views over the module's byte slice;
//! nothing here allocates or writes.

use spin::Once;

use crate::kernel::core::{ErrorKind, FsError, KernelError, KernelResult};

/// Block size in bytes.
pub const BLOCK_SIZE: usize = 4096;

/// Maximum length of a file name (not NUL-terminated when full).
pub const MAX_FILENAME_SIZE: usize = 32;

/// Maximum number of directory entries in the boot block.
pub const MAX_DENTRIES: usize = 63;

/// Size of one on-disk directory entry.
const DENTRY_SIZE: usize = 64;

/// Offset of the first directory entry inside the boot block.
const DENTRY_TABLE_OFFSET: usize = 64;

/// Directory-entry type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DentryType {
    /// Real-time clock device file.
    Rtc,
    /// The directory itself.
    Directory,
    /// Regular file.
    Regular,
}

impl DentryType {
    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(DentryType::Rtc),
            1 => Some(DentryType::Directory),
            2 => Some(DentryType::Regular),
            _ => None,
        }
    }
}

/// A decoded directory entry.
#[derive(Debug, Clone, Copy)]
pub struct Dentry {
    /// Raw 32-byte name, NUL-padded when shorter.
    pub name: [u8; MAX_FILENAME_SIZE],
    /// Entry type.
    pub dtype: DentryType,
    /// Inode index (meaningful for regular files only).
    pub inode: u32,
}

/// Pads (or truncates) a queried name to the on-disk 32-byte form.
///
/// Comparison happens on exactly 32 bytes, so a longer query matches an
/// entry whose name fills all 32 characters.
fn padded_name(name: &[u8]) -> [u8; MAX_FILENAME_SIZE] {
    let mut out = [0u8; MAX_FILENAME_SIZE];
    let n = name.len().min(MAX_FILENAME_SIZE);
    out[..n].copy_from_slice(&name[..n]);
    out
}

/// Read-only view over a mounted filesystem image.
pub struct Filesystem<'a> {
    image: &'a [u8],
    n_dentries: usize,
    n_inodes: usize,
}

impl<'a> Filesystem<'a> {
    /// Parses the boot block of `image` and validates its counts.
    pub fn from_bytes(image: &'a [u8]) -> KernelResult<Self> {
        if image.len() < BLOCK_SIZE {
            return Err(KernelError::with_context(
                ErrorKind::Fs(FsError::Malformed),
                "image smaller than boot block",
            ));
        }

        let n_dentries = read_u32(image, 0) as usize;
        let n_inodes = read_u32(image, 4) as usize;

        if n_dentries > MAX_DENTRIES {
            return Err(KernelError::with_context(
                ErrorKind::Fs(FsError::Malformed),
                "too many directory entries",
            ));
        }

        // Every inode block must exist inside the image.
        if (1 + n_inodes) * BLOCK_SIZE > image.len() {
            return Err(KernelError::with_context(
                ErrorKind::Fs(FsError::Malformed),
                "inode table exceeds image",
            ));
        }

        Ok(Self {
            image,
            n_dentries,
            n_inodes,
        })
    }

    /// Number of directory entries.
    #[must_use]
    pub fn dentry_count(&self) -> usize {
        self.n_dentries
    }

    /// Looks a directory entry up by (at most 32 bytes of) name.
    pub fn dentry_by_name(&self, name: &[u8]) -> KernelResult<Dentry> {
        let wanted = padded_name(name);

        for index in 0..self.n_dentries {
            let dentry = self.dentry_by_index(index)?;
            if dentry.name == wanted {
                return Ok(dentry);
            }
        }

        Err(FsError::NotFound.into())
    }

    /// Decodes the directory entry at `index`.
    pub fn dentry_by_index(&self, index: usize) -> KernelResult<Dentry> {
        if index >= self.n_dentries {
            return Err(FsError::NotFound.into());
        }

        let base = DENTRY_TABLE_OFFSET + index * DENTRY_SIZE;
        let mut name = [0u8; MAX_FILENAME_SIZE];
        name.copy_from_slice(&self.image[base..base + MAX_FILENAME_SIZE]);

        let dtype = DentryType::from_raw(read_u32(self.image, base + MAX_FILENAME_SIZE))
            .ok_or_else(|| {
                KernelError::with_context(ErrorKind::Fs(FsError::Malformed), "bad dentry type")
            })?;
        let inode = read_u32(self.image, base + MAX_FILENAME_SIZE + 4);

        Ok(Dentry { name, dtype, inode })
    }

    /// Size in bytes of the file behind `inode`.
    pub fn inode_size(&self, inode: u32) -> KernelResult<usize> {
        let base = self.inode_offset(inode)?;
        Ok(read_u32(self.image, base) as usize)
    }

    /// Reads up to `buf.len()` bytes from `inode` starting at `offset`,
    /// walking the inode's block list. Returns the bytes copied; reads at
    /// or past EOF return 0.
    pub fn read_data(&self, inode: u32, offset: usize, buf: &mut [u8]) -> KernelResult<usize> {
        let inode_base = self.inode_offset(inode)?;
        let size = read_u32(self.image, inode_base) as usize;

        let mut copied = 0;
        while copied < buf.len() && offset + copied < size {
            let pos = offset + copied;
            let block_index = pos / BLOCK_SIZE;
            let block_offset = pos % BLOCK_SIZE;

            let block_num = read_u32(self.image, inode_base + 4 + 4 * block_index) as usize;
            let data_base = (1 + self.n_inodes + block_num) * BLOCK_SIZE;
            if data_base + BLOCK_SIZE > self.image.len() {
                return Err(KernelError::with_context(
                    ErrorKind::Fs(FsError::Malformed),
                    "data block outside image",
                ));
            }

            let chunk = (BLOCK_SIZE - block_offset)
                .min(buf.len() - copied)
                .min(size - pos);
            let src = &self.image[data_base + block_offset..data_base + block_offset + chunk];
            buf[copied..copied + chunk].copy_from_slice(src);
            copied += chunk;
        }

        Ok(copied)
    }

    /// One directory-listing step: copies the name of entry `index` into
    /// `buf` with a terminating NUL when room allows. Returns bytes
    /// written, or 0 once the listing is exhausted.
    pub fn read_dir_entry(&self, index: usize, buf: &mut [u8]) -> usize {
        let Ok(dentry) = self.dentry_by_index(index) else {
            return 0;
        };

        let copied = buf.len().min(MAX_FILENAME_SIZE);
        buf[..copied].copy_from_slice(&dentry.name[..copied]);

        if buf.len() > copied {
            buf[copied] = 0;
            copied + 1
        } else {
            copied
        }
    }

    fn inode_offset(&self, inode: u32) -> KernelResult<usize> {
        let inode = inode as usize;
        if inode >= self.n_inodes {
            return Err(FsError::NotFound.into());
        }
        Ok((1 + inode) * BLOCK_SIZE)
    }
}

/// Little-endian u32 at `offset`; out-of-range reads yield 0 so a lying
/// size field cannot walk off the image.
fn read_u32(image: &[u8], offset: usize) -> u32 {
    match image.get(offset..offset + 4) {
        Some(bytes) => u32::from_le_bytes(bytes.try_into().unwrap_or([0; 4])),
        None => 0,
    }
}

/// The mounted filesystem.
static FILESYSTEM: Once<Filesystem<'static>> = Once::new();

/// Mounts the boot module found at `start..end` (physical, identity-mapped).
///
/// # Safety
///
/// The range must stay valid and untouched for the kernel's lifetime.
pub unsafe fn init(start: usize, end: usize) -> KernelResult<()> {
    if end <= start {
        return Err(KernelError::with_context(
            ErrorKind::Fs(FsError::Malformed),
            "empty boot module",
        ));
    }

    // SAFETY: caller vouches for the module range.
    let image = unsafe { core::slice::from_raw_parts(start as *const u8, end - start) };
    let fs = Filesystem::from_bytes(image)?;
    FILESYSTEM.call_once(|| fs);
    Ok(())
}

/// The mounted filesystem, if any.
pub fn get() -> Option<&'static Filesystem<'static>> {
    FILESYSTEM.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a tiny image: boot block, two inodes, three data blocks.
    ///
    /// inode 0 ("frame0.txt"): 5000 bytes spanning data blocks 0 and 2.
    /// inode 1 ("rtc" is an RTC node; "." the directory).
    fn test_image() -> [u8; BLOCK_SIZE * 6] {
        let mut img = [0u8; BLOCK_SIZE * 6];

        let put_u32 = |img: &mut [u8], off: usize, v: u32| {
            img[off..off + 4].copy_from_slice(&v.to_le_bytes());
        };

        // Boot block: 3 dentries, 2 inodes, 3 data blocks.
        put_u32(&mut img, 0, 3);
        put_u32(&mut img, 4, 2);
        put_u32(&mut img, 8, 3);

        // Dentry 0: "." directory.
        let d0 = DENTRY_TABLE_OFFSET;
        img[d0] = b'.';
        put_u32(&mut img, d0 + 32, 1);

        // Dentry 1: "rtc" device node.
        let d1 = DENTRY_TABLE_OFFSET + DENTRY_SIZE;
        img[d1..d1 + 3].copy_from_slice(b"rtc");
        put_u32(&mut img, d1 + 32, 0);

        // Dentry 2: "frame0.txt" regular file, inode 0.
        let d2 = DENTRY_TABLE_OFFSET + 2 * DENTRY_SIZE;
        img[d2..d2 + 10].copy_from_slice(b"frame0.txt");
        put_u32(&mut img, d2 + 32, 2);
        put_u32(&mut img, d2 + 36, 0);

        // Inode 0: 5000 bytes in data blocks 0 then 2.
        let i0 = BLOCK_SIZE;
        put_u32(&mut img, i0, 5000);
        put_u32(&mut img, i0 + 4, 0);
        put_u32(&mut img, i0 + 8, 2);

        // Data block 0 (image block 3): 'A' bytes.
        // Data block 2 (image block 5): 'B' bytes.
        let data0 = 3 * BLOCK_SIZE;
        let data2 = 5 * BLOCK_SIZE;
        img[data0..data0 + BLOCK_SIZE].fill(b'A');
        img[data2..data2 + BLOCK_SIZE].fill(b'B');

        img
    }

    #[test]
    fn lookup_by_name_and_index() {
        let img = test_image();
        let fs = Filesystem::from_bytes(&img).unwrap();

        assert_eq!(fs.dentry_count(), 3);

        let file = fs.dentry_by_name(b"frame0.txt").unwrap();
        assert_eq!(file.dtype, DentryType::Regular);
        assert_eq!(file.inode, 0);

        let rtc = fs.dentry_by_name(b"rtc").unwrap();
        assert_eq!(rtc.dtype, DentryType::Rtc);

        let dir = fs.dentry_by_index(0).unwrap();
        assert_eq!(dir.dtype, DentryType::Directory);

        assert!(fs.dentry_by_name(b"missing").is_err());
        assert!(fs.dentry_by_index(3).is_err());
    }

    #[test]
    fn read_spans_block_boundary() {
        let img = test_image();
        let fs = Filesystem::from_bytes(&img).unwrap();

        // 16 bytes straddling the first block boundary: 8 'A's, 8 'B's.
        let mut buf = [0u8; 16];
        let n = fs.read_data(0, BLOCK_SIZE - 8, &mut buf).unwrap();
        assert_eq!(n, 16);
        assert_eq!(&buf[..8], b"AAAAAAAA");
        assert_eq!(&buf[8..], b"BBBBBBBB");
    }

    #[test]
    fn read_stops_at_eof() {
        let img = test_image();
        let fs = Filesystem::from_bytes(&img).unwrap();

        let mut buf = [0u8; 64];
        // File is 5000 bytes; read the tail.
        let n = fs.read_data(0, 4990, &mut buf).unwrap();
        assert_eq!(n, 10);

        // At EOF: zero bytes.
        let n = fs.read_data(0, 5000, &mut buf).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn directory_listing_terminates() {
        let img = test_image();
        let fs = Filesystem::from_bytes(&img).unwrap();

        let mut buf = [0xFFu8; 64];
        let n = fs.read_dir_entry(2, &mut buf);
        assert_eq!(n, MAX_FILENAME_SIZE + 1);
        assert_eq!(&buf[..10], b"frame0.txt");
        assert_eq!(buf[MAX_FILENAME_SIZE], 0);

        // Past the last entry: nothing.
        assert_eq!(fs.read_dir_entry(3, &mut buf), 0);
    }

    #[test]
    fn overlong_query_matches_on_32_bytes() {
        let mut img = test_image();
        // Rename dentry 2 to a full 32-character name.
        let d2 = DENTRY_TABLE_OFFSET + 2 * DENTRY_SIZE;
        img[d2..d2 + 32].copy_from_slice(b"verylargetextwithverylongname.tx");

        let fs = Filesystem::from_bytes(&img).unwrap();
        assert!(fs.dentry_by_name(b"verylargetextwithverylongname.tx").is_ok());
        // 33rd character is ignored by the fixed-width compare.
        assert!(
            fs.dentry_by_name(b"verylargetextwithverylongname.txt").is_ok()
        );
    }

    #[test]
    fn malformed_images_are_rejected() {
        assert!(Filesystem::from_bytes(&[0u8; 16]).is_err());

        let mut img = test_image();
        // Claim more inodes than the image can hold.
        img[4..8].copy_from_slice(&1000u32.to_le_bytes());
        assert!(Filesystem::from_bytes(&img).is_err());
    }
}
