use std::io::{self, Read, Write};

/// Outcome of one read into a [`Link`] buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// `n` bytes were appended to the buffer.
    Read(usize),
    /// The source reached end-of-stream.
    Eof,
    /// The source has nothing to offer right now.
    WouldBlock,
    /// The buffer has no free space; nothing was read.
    Full,
}

/// Outcome of pushing buffered bytes into the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// Every buffered byte was accepted; the buffer is empty again.
    Drained,
    /// The destination stopped accepting bytes. The remainder has been
    /// compacted to the front of the buffer.
    Stalled,
}

/// One direction of a session: a fixed-capacity buffer between a source and
/// a destination socket.
///
/// The link never owns the sockets themselves; the session does. Bytes live
/// in `buf[head..tail]` until the destination accepts them.
#[derive(Debug)]
pub struct Link {
    buf: Box<[u8]>,
    head: usize,
    tail: usize,
    read_open: bool,
    suspended: bool,
    forwarded: u64,
}

impl Link {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity.max(1)].into_boxed_slice(),
            head: 0,
            tail: 0,
            read_open: true,
            suspended: false,
            forwarded: 0,
        }
    }

    /// Bytes read from the source that the destination has not taken yet.
    pub fn pending(&self) -> usize {
        self.tail - self.head
    }

    pub fn is_drained(&self) -> bool {
        self.head == self.tail
    }

    /// `false` once the source reported end-of-stream.
    pub fn is_read_open(&self) -> bool {
        self.read_open
    }

    /// `true` while the destination is write-pending and reads from the
    /// source are held back.
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Whether the source should currently be polled for read readiness.
    pub fn wants_read(&self) -> bool {
        self.read_open && !self.suspended
    }

    /// Total bytes handed to the destination over the life of the link.
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    pub fn resume(&mut self) {
        self.suspended = false;
    }

    /// Read once from `src` into the free tail of the buffer.
    pub fn fill_from(&mut self, mut src: impl Read) -> io::Result<Fill> {
        if self.tail == self.buf.len() {
            return Ok(Fill::Full);
        }
        loop {
            match src.read(&mut self.buf[self.tail..]) {
                Ok(0) => {
                    self.read_open = false;
                    return Ok(Fill::Eof);
                }
                Ok(n) => {
                    self.tail += n;
                    return Ok(Fill::Read(n));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Fill::WouldBlock)
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Write as much of the buffer into `dst` as it accepts right now.
    pub fn flush_into(&mut self, mut dst: impl Write) -> io::Result<Flush> {
        while self.head < self.tail {
            match dst.write(&self.buf[self.head..self.tail]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.head += n;
                    self.forwarded += n as u64;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.compact();
                    return Ok(Flush::Stalled);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        self.head = 0;
        self.tail = 0;
        Ok(Flush::Drained)
    }

    fn compact(&mut self) {
        if self.head > 0 {
            self.buf.copy_within(self.head..self.tail, 0);
            self.tail -= self.head;
            self.head = 0;
        }
    }
}
