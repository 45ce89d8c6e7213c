use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

/// Byte-oriented duplex stream to the host.
pub trait Transport {
    /// Bytes that can be read without blocking.
    fn available(&mut self) -> io::Result<usize>;
    fn read_byte(&mut self) -> io::Result<Option<u8>>;
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
    /// Re-establishes the stream at a new line rate.
    fn reopen(&mut self, baud: u32) -> io::Result<()>;
    /// Changes whenever a different host is on the other end.
    fn session(&self) -> u64 {
        0
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn available(&mut self) -> io::Result<usize> {
        (**self).available()
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        (**self).read_byte()
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_bytes(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn reopen(&mut self, baud: u32) -> io::Result<()> {
        (**self).reopen(baud)
    }

    fn session(&self) -> u64 {
        (**self).session()
    }
}

/// Replies queued for a host that is not reading; past this the host is
/// dropped instead of stalling the link loop.
pub const TX_BACKLOG_LIMIT: usize = 64 * 1024;

/// Serves the link over TCP, one host at a time. TCP has no line rate, so
/// `reopen` only records and logs it. Nothing here blocks: output the socket
/// won't take yet stays queued until the next `flush`.
pub struct TcpTransport {
    listener: TcpListener,
    client: Option<(TcpStream, SocketAddr)>,
    rx: VecDeque<u8>,
    tx: VecDeque<u8>,
    baud: u32,
    session: u64,
}

impl TcpTransport {
    pub fn bind<A: ToSocketAddrs>(addr: A, baud: u32) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        log::info!("listening on {}", listener.local_addr()?);
        Ok(TcpTransport {
            listener,
            client: None,
            rx: VecDeque::new(),
            tx: VecDeque::new(),
            baud,
            session: 0,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Bytes written but not yet taken by the socket.
    pub fn backlog(&self) -> usize {
        self.tx.len()
    }

    fn accept(&mut self) -> io::Result<()> {
        if self.client.is_some() {
            return Ok(());
        }
        match self.listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(true)?;
                stream.set_nodelay(true)?;
                log::info!("host connected from {}", peer);
                self.client = Some((stream, peer));
                self.session += 1;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn disconnect(&mut self, why: &str) {
        if let Some((_, peer)) = self.client.take() {
            log::info!("host {} disconnected ({})", peer, why);
        }
        self.rx.clear();
        self.tx.clear();
    }

    // One read per call so a flooding host can't keep the link loop here.
    fn fill(&mut self) -> io::Result<()> {
        let mut buf = [0u8; 256];
        loop {
            let Some((stream, _)) = self.client.as_mut() else {
                return Ok(());
            };
            return match stream.read(&mut buf) {
                Ok(0) => {
                    self.disconnect("eof");
                    Ok(())
                }
                Ok(n) => {
                    self.rx.extend(&buf[..n]);
                    Ok(())
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.disconnect("read error");
                    Err(e)
                }
            };
        }
    }

    /// Hands queued output to the socket until it would block.
    fn drain(&mut self) -> io::Result<()> {
        while !self.tx.is_empty() {
            let Some((stream, _)) = self.client.as_mut() else {
                self.tx.clear();
                return Ok(());
            };
            let (front, _) = self.tx.as_slices();
            match stream.write(front) {
                Ok(0) => {
                    self.disconnect("write error");
                    return Err(io::Error::from(ErrorKind::WriteZero));
                }
                Ok(n) => {
                    self.tx.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.disconnect("write error");
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

impl Transport for TcpTransport {
    fn available(&mut self) -> io::Result<usize> {
        self.accept()?;
        if self.rx.is_empty() {
            self.fill()?;
        }
        Ok(self.rx.len())
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if self.rx.is_empty() {
            self.fill()?;
        }
        Ok(self.rx.pop_front())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.client.is_none() {
            log::trace!("no host, dropped {} bytes", bytes.len());
            return Ok(());
        }
        self.tx.extend(bytes);
        self.drain()?;
        if self.tx.len() > TX_BACKLOG_LIMIT {
            log::warn!("host stopped reading ({} bytes queued)", self.tx.len());
            self.disconnect("backlog full");
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.drain()?;
        match self.client.as_mut() {
            Some((stream, _)) => stream.flush(),
            None => Ok(()),
        }
    }

    fn reopen(&mut self, baud: u32) -> io::Result<()> {
        log::info!("link rate {} -> {} baud", self.baud, baud);
        self.baud = baud;
        Ok(())
    }

    fn session(&self) -> u64 {
        self.session
    }
}

/// In-memory transport: the test side pushes host bytes and collects what
/// the bridge wrote.
#[derive(Default)]
pub struct LoopbackTransport {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    reopens: Vec<u32>,
    flushes: usize,
    session: u64,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_input(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.tx)
    }

    pub fn reopens(&self) -> &[u32] {
        &self.reopens
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// Stands in for a new host: unread input is gone and the session moves on.
    pub fn reconnect(&mut self) {
        self.rx.clear();
        self.session += 1;
    }
}

impl Transport for LoopbackTransport {
    fn available(&mut self) -> io::Result<usize> {
        Ok(self.rx.len())
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.rx.pop_front())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.tx.extend_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flushes += 1;
        Ok(())
    }

    fn reopen(&mut self, baud: u32) -> io::Result<()> {
        self.reopens.push(baud);
        Ok(())
    }

    fn session(&self) -> u64 {
        self.session
    }
}
