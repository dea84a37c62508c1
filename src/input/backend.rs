use super::{ElfReader, IntoElfReader};
use crate::{Result, error::io_error};
use alloc::{
    borrow::Cow,
    string::{String, ToString},
    vec::Vec,
};

/// An object source backed by bytes in memory.
///
/// The bytes are either borrowed (an object embedded in the firmware image,
/// a buffer received over BLE) or owned.
#[derive(Debug, Clone)]
pub struct ElfBinary<'bytes> {
    /// The name assigned to this object.
    name: String,
    /// The raw object data.
    bytes: Cow<'bytes, [u8]>,
}

impl<'bytes> ElfBinary<'bytes> {
    /// Creates a new memory-based object.
    ///
    /// # Examples
    /// ```rust
    /// use xip_loader::input::ElfBinary;
    ///
    /// let data = &[]; // In practice, this would be the bytes of an ELF object
    /// let binary = ElfBinary::new("app.llext", data);
    /// ```
    pub fn new(name: &str, bytes: &'bytes [u8]) -> Self {
        Self {
            name: name.to_string(),
            bytes: Cow::Borrowed(bytes),
        }
    }

    /// Creates a memory-based object that owns its bytes.
    pub fn from_vec(name: &str, bytes: Vec<u8>) -> ElfBinary<'static> {
        ElfBinary {
            name: name.to_string(),
            bytes: Cow::Owned(bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl ElfReader for ElfBinary<'_> {
    fn file_name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()> {
        read_slice(&self.bytes, buf, offset)
    }
}

#[inline]
fn read_slice(bytes: &[u8], buf: &mut [u8], offset: usize) -> Result<()> {
    let end = offset
        .checked_add(buf.len())
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| {
            io_error(alloc::format!(
                "read of {:#x} bytes at {offset:#x} is past the end of the object",
                buf.len()
            ))
        })?;
    buf.copy_from_slice(&bytes[offset..end]);
    Ok(())
}

// Implementation of `ElfReader` for byte slices.
impl ElfReader for &[u8] {
    /// Returns a generic name for memory-based data.
    fn file_name(&self) -> &str {
        "<memory>"
    }

    fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()> {
        read_slice(self, buf, offset)
    }
}

#[cfg(feature = "std")]
mod file {
    use super::*;
    use std::{
        fs::File,
        io::{Read, Seek, SeekFrom},
        path::Path,
    };

    /// An object source backed by a file on the host filesystem.
    #[derive(Debug)]
    pub struct ElfFile {
        name: String,
        file: File,
    }

    impl ElfFile {
        /// Opens the object at `path`.
        pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref();
            let file = File::open(path)
                .map_err(|e| io_error(alloc::format!("open {}: {e}", path.display())))?;
            Ok(Self::from_file(&path.to_string_lossy(), file))
        }

        /// Wraps an already opened file.
        pub fn from_file(name: &str, file: File) -> Self {
            Self {
                name: name.to_string(),
                file,
            }
        }
    }

    impl ElfReader for ElfFile {
        fn file_name(&self) -> &str {
            &self.name
        }

        fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()> {
            self.file
                .seek(SeekFrom::Start(offset as u64))
                .and_then(|_| self.file.read_exact(buf))
                .map_err(|e| {
                    io_error(alloc::format!(
                        "read {:#x} bytes at {offset:#x} from {}: {e}",
                        buf.len(),
                        self.name
                    ))
                })
        }
    }

    // Implementation for string slices (file paths)
    impl<'a> IntoElfReader<'a> for &'a str {
        type Reader = ElfFile;

        fn into_reader(self) -> Result<Self::Reader> {
            ElfFile::from_path(self)
        }
    }

    // Implementation for already constructed ElfFile (pass-through)
    impl<'a> IntoElfReader<'a> for ElfFile {
        type Reader = ElfFile;

        fn into_reader(self) -> Result<Self::Reader> {
            Ok(self)
        }
    }
}

#[cfg(feature = "std")]
pub use file::ElfFile;

// Implementation for byte slices (in-memory ELF data)
impl<'a> IntoElfReader<'a> for &'a [u8] {
    type Reader = ElfBinary<'a>;

    fn into_reader(self) -> Result<Self::Reader> {
        Ok(ElfBinary::new("<memory>", self))
    }
}

impl<'a> IntoElfReader<'a> for &'a Vec<u8> {
    type Reader = ElfBinary<'a>;

    fn into_reader(self) -> Result<Self::Reader> {
        Ok(ElfBinary::new("<memory>", self.as_slice()))
    }
}

// Implementation for already constructed ElfBinary (pass-through)
impl<'a, 'b> IntoElfReader<'a> for ElfBinary<'b>
where
    'b: 'a,
{
    type Reader = ElfBinary<'b>;

    fn into_reader(self) -> Result<Self::Reader> {
        Ok(self)
    }
}

impl<'a, R: ElfReader + ?Sized> IntoElfReader<'a> for &'a mut R {
    type Reader = &'a mut R;

    fn into_reader(self) -> Result<Self::Reader> {
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn out_of_bounds_read_is_an_error() {
        let data = [1u8, 2, 3, 4];
        let mut bin = ElfBinary::new("x", &data);
        let mut buf = [0u8; 2];
        bin.read(&mut buf, 2).unwrap();
        assert_eq!(buf, [3, 4]);
        assert!(matches!(bin.read(&mut buf, 3), Err(Error::Io { .. })));
        assert!(matches!(bin.read(&mut buf, usize::MAX), Err(Error::Io { .. })));
    }

    #[test]
    fn shortname_strips_directories() {
        let bin = ElfBinary::from_vec("/lvgl_lfs/apps/about/app.llext", Vec::new());
        assert_eq!(bin.shortname(), "app.llext");
    }
}
