use crate::Result;

/// A trait for reading relocatable objects from various sources.
///
/// `ElfReader` abstracts the underlying storage (memory, file system, a
/// littlefs handle on the device, etc.). The loader only ever asks for small
/// pieces at a time: headers, one symbol, one relocation batch or one
/// streaming chunk.
pub trait ElfReader {
    /// Returns the full name or path of the object.
    fn file_name(&self) -> &str;

    /// Reads a chunk of data from the object into the provided buffer.
    ///
    /// # Arguments
    /// * `buf` - The destination buffer. Its length determines the number of bytes read.
    /// * `offset` - The starting byte offset within the object.
    fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()>;

    /// Returns the short name of the object (the filename without the path).
    fn shortname(&self) -> &str {
        let name = self.file_name();
        name.rsplit('/').next().unwrap_or(name)
    }
}

impl<R: ElfReader + ?Sized> ElfReader for &mut R {
    fn file_name(&self) -> &str {
        (**self).file_name()
    }

    fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()> {
        (**self).read(buf, offset)
    }
}

/// A trait for converting various input sources into an `ElfReader`.
pub trait IntoElfReader<'a> {
    /// The type of reader produced by this conversion.
    type Reader: ElfReader + 'a;

    /// Converts the input into an `ElfReader`.
    ///
    /// # Returns
    /// * `Ok(reader)` - The converted reader.
    /// * `Err(error)` - If the conversion fails (e.g., file not found).
    fn into_reader(self) -> Result<Self::Reader>;
}
