use crate::{read_frame, write_frame, WireError, WireResult, FRAME_SIZE, GO, READY, SUCCESS};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;

/// Pushes a local file to the exchange under `(id, filename)`. Returns the
/// number of bytes transferred.
pub fn send_file<A: ToSocketAddrs>(addr: A, id: &str, filename: &str, source: &Path) -> WireResult<u64> {
    let size = fs::metadata(source)?.len();
    let mut source = File::open(source)?;
    let mut stream = TcpStream::connect(addr)?;

    write_frame(&mut stream, &format!("SEND {} {} {}", size, id, filename))?;
    expect(&mut stream, READY)?;

    let mut buf = [0u8; FRAME_SIZE];

    loop {
        let count = source.read(&mut buf)?;

        if count == 0 {
            break;
        }

        stream.write_all(&buf[..count])?;
    }

    expect(&mut stream, SUCCESS)?;

    Ok(size)
}

/// Pulls the file stored under `(id, filename)` into `dest`. Returns the
/// number of bytes transferred.
pub fn fetch_file<A: ToSocketAddrs>(addr: A, id: &str, filename: &str, dest: &Path) -> WireResult<u64> {
    let mut stream = TcpStream::connect(addr)?;

    write_frame(&mut stream, &format!("RECEIVE {} {}", id, filename))?;

    let reply = read_frame(&mut stream)?;
    let mut parts = reply.split_whitespace();

    let size = match (parts.next(), parts.next()) {
        (Some(READY), Some(size)) => size.parse::<u64>().map_err(|_| WireError::BadFrame)?,
        _ => return Err(WireError::Refused),
    };

    write_frame(&mut stream, GO)?;

    let mut dest = File::create(dest)?;
    let mut buf = [0u8; FRAME_SIZE];
    let mut total: u64 = 0;

    while total < size {
        let count = stream.read(&mut buf)?;

        if count == 0 {
            return Err(WireError::Refused);
        }

        dest.write_all(&buf[..count])?;
        total += count as u64;
    }

    write_frame(&mut stream, SUCCESS)?;

    Ok(size)
}

fn expect(stream: &mut TcpStream, frame: &str) -> WireResult<()> {
    let reply = read_frame(stream)?;

    if reply == frame {
        Ok(())
    } else {
        Err(WireError::Refused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server;
    use hearth::logging;
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    struct Exchange {
        addr: std::net::SocketAddr,
        stop: Arc<AtomicBool>,
        thread: Option<thread::JoinHandle<()>>,
    }

    impl Exchange {
        /// Spins up a listener on an OS-assigned loopback port.
        fn start(root: &Path) -> Exchange {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = listener.local_addr().unwrap();
            let stop = Arc::new(AtomicBool::new(false));

            let serve_root = root.to_path_buf();
            let serve_stop = stop.clone();
            let thread = thread::spawn(move || {
                server::serve(listener, serve_root, serve_stop, logging::discard());
            });

            Exchange {
                addr,
                stop,
                thread: Some(thread),
            }
        }
    }

    impl Drop for Exchange {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Relaxed);
            // One throwaway connection unblocks the accept loop.
            drop(TcpStream::connect(self.addr));
            drop(self.thread.take().unwrap().join());
        }
    }

    #[test]
    fn test_send_fetch_roundtrip() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let exchange = Exchange::start(root.path());

        let payload: Vec<u8> = (0..4099u32).map(|i| (i % 251) as u8).collect();
        let source = work.path().join("scene.blend");
        fs::write(&source, &payload).unwrap();

        let sent = send_file(exchange.addr, "job1", "scene.blend", &source).unwrap();
        assert_eq!(sent, payload.len() as u64);
        assert_eq!(
            fs::read(root.path().join("job1").join("scene.blend")).unwrap(),
            payload
        );

        let fetched = work.path().join("fetched.blend");
        let received = fetch_file(exchange.addr, "job1", "scene.blend", &fetched).unwrap();

        assert_eq!(received, payload.len() as u64);
        assert_eq!(fs::read(&fetched).unwrap(), payload);
    }

    #[test]
    fn test_send_overwrites_previous_upload() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let exchange = Exchange::start(root.path());

        let source = work.path().join("scene.blend");

        fs::write(&source, b"first version with some length").unwrap();
        send_file(exchange.addr, "job1", "scene.blend", &source).unwrap();

        fs::write(&source, b"second").unwrap();
        send_file(exchange.addr, "job1", "scene.blend", &source).unwrap();

        assert_eq!(
            fs::read(root.path().join("job1").join("scene.blend")).unwrap(),
            b"second"
        );
    }

    #[test]
    fn test_fetch_missing_file_refused() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let exchange = Exchange::start(root.path());

        let result = fetch_file(
            exchange.addr,
            "nojob",
            "missing.blend",
            &work.path().join("missing.blend"),
        );

        assert_eq!(result.unwrap_err(), WireError::Refused);
    }
}
