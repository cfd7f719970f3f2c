use super::ClusteredStreams;
use crate::list::RangeList;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Cursor over one stream of a container
///
/// Each call takes the container's access scope for its own duration only.
pub struct StreamHandle<'a, B: RangeList<u8>> {
    container: &'a ClusteredStreams<B>,
    index: usize,
    position: u64,
}

impl<'a, B: RangeList<u8>> StreamHandle<'a, B> {
    pub(crate) fn new(container: &'a ClusteredStreams<B>, index: usize) -> Self {
        StreamHandle {
            container,
            index,
            position: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn len(&self) -> io::Result<u64> {
        Ok(self.container.stream_length(self.index)?)
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Truncate or zero-extend the stream
    pub fn set_len(&mut self, len: u64) -> io::Result<()> {
        Ok(self.container.set_length(self.index, len)?)
    }
}

impl<B: RangeList<u8>> Read for StreamHandle<'_, B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.len()?;
        if self.position >= len {
            return Ok(0);
        }
        let count = ((len - self.position) as usize).min(buf.len());
        self.container
            .read(self.index, self.position, &mut buf[..count])?;
        self.position += count as u64;
        Ok(count)
    }
}

impl<B: RangeList<u8>> Write for StreamHandle<'_, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.container.write(self.index, self.position, buf)?;
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.container.flush()?)
    }
}

impl<B: RangeList<u8>> Seek for StreamHandle<'_, B> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len()?.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::memory::MemoryBuffer;
    use crate::options::ContainerOptions;
    use crate::streams::ClusteredStreams;
    use std::io::{Read, Seek, SeekFrom, Write};

    #[test]
    fn test_handle_read_write_seek() {
        let options = ContainerOptions {
            cluster_size: 5,
            ..ContainerOptions::default()
        };
        let streams = ClusteredStreams::create(MemoryBuffer::new(), &options).unwrap();
        let index = streams.add().unwrap();

        let mut handle = streams.open_stream(index).unwrap();
        handle.write_all(b"hello clustered world").unwrap();
        handle.seek(SeekFrom::Start(6)).unwrap();
        handle.write_all(b"CLUSTERED").unwrap();

        handle.seek(SeekFrom::End(-5)).unwrap();
        let mut tail = String::new();
        handle.read_to_string(&mut tail).unwrap();
        assert_eq!(tail, "world");

        handle.rewind().unwrap();
        let mut all = Vec::new();
        handle.read_to_end(&mut all).unwrap();
        assert_eq!(all, b"hello CLUSTERED world");
        assert!(handle.seek(SeekFrom::Current(-100)).is_err());
    }

    #[test]
    fn test_reaped_stream_cannot_be_opened() {
        let streams = ClusteredStreams::create(MemoryBuffer::new(), &ContainerOptions::default()).unwrap();
        let index = streams.add().unwrap();
        streams.reap(index).unwrap();
        assert!(streams.open_stream(index).is_err());
    }
}
