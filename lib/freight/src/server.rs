use crate::{read_frame, write_frame, WireError, WireResult, ABORT, FRAME_SIZE, GO, READY, SUCCESS};
use hearth::logging::{self, debug, error, info, o};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Accept loop of the file exchange. Every accepted connection is handled on
/// its own thread with no shared mutable state; the loop exits once the stop
/// flag is raised and one further connection arrives.
pub fn serve(listener: TcpListener, root: PathBuf, stop: Arc<AtomicBool>, log: logging::Logger) {
    info!(log, "file exchange listening"; "root" => %root.display());

    for incoming in listener.incoming() {
        if stop.load(Ordering::Relaxed) {
            break;
        }

        match incoming {
            Ok(stream) => {
                let peer = stream
                    .peer_addr()
                    .map(|addr| addr.to_string())
                    .unwrap_or_default();
                let conn_log = log.new(o!("peer" => peer));
                let conn_root = root.clone();

                thread::spawn(move || {
                    let mut stream = stream;
                    if let Err(err) = handle_connection(&mut stream, &conn_root, &conn_log) {
                        debug!(conn_log, "connection aborted"; "err" => ?err);
                    }
                });
            }
            Err(err) => error!(log, "accept failed"; "err" => ?err),
        }
    }

    info!(log, "file exchange listener stopped");
}

/// Parses the opening control frame and runs the requested transfer. The
/// caller owns the connection; it is closed on return either way.
pub fn handle_connection<S: Read + Write>(
    stream: &mut S,
    root: &Path,
    log: &logging::Logger,
) -> WireResult<()> {
    let frame = match read_frame(stream) {
        Ok(frame) => frame,
        Err(err) => {
            abort(stream);
            return Err(err);
        }
    };

    let parts: Vec<&str> = frame.split_whitespace().collect();

    match parts.as_slice() {
        ["SEND", size, id, filename] => match size.parse::<u64>() {
            Ok(size) => receive_upload(stream, root, size, id, filename, log),
            Err(_) => {
                abort(stream);
                Err(WireError::BadFrame)
            }
        },
        ["RECEIVE", id, filename] => serve_download(stream, root, id, filename, log),
        _ => {
            abort(stream);
            Err(WireError::BadFrame)
        }
    }
}

/// `SEND`: the peer pushes `declared` bytes into `<root>/<id>/<filename>`.
fn receive_upload<S: Read + Write>(
    stream: &mut S,
    root: &Path,
    declared: u64,
    id: &str,
    filename: &str,
    log: &logging::Logger,
) -> WireResult<()> {
    if !plain_name(id) || !plain_name(filename) {
        abort(stream);
        return Err(WireError::BadFrame);
    }

    let dir = root.join(id);

    if let Err(err) = fs::create_dir_all(&dir) {
        abort(stream);
        return Err(err.into());
    }

    // Opened without truncation: the destination is only cut down after
    // READY is on the wire, a refused handshake leaves an existing file
    // untouched.
    let mut file = match OpenOptions::new().write(true).create(true).open(dir.join(filename)) {
        Ok(file) => file,
        Err(err) => {
            abort(stream);
            return Err(err.into());
        }
    };

    write_frame(stream, READY)?;

    if let Err(err) = file.set_len(0) {
        abort(stream);
        return Err(err.into());
    }

    let mut buf = [0u8; FRAME_SIZE];
    let mut total: u64 = 0;

    while total < declared {
        let count = match stream.read(&mut buf) {
            Ok(0) => {
                abort(stream);
                return Err(WireError::Refused);
            }
            Ok(count) => count,
            Err(err) => {
                abort(stream);
                return Err(err.into());
            }
        };

        if let Err(err) = file.write_all(&buf[..count]) {
            abort(stream);
            return Err(err.into());
        }

        total += count as u64;
    }

    debug!(log, "upload stored"; "id" => id, "file" => filename, "bytes" => total);

    write_frame(stream, SUCCESS)
}

/// `RECEIVE`: the peer pulls the file stored under `<root>/<id>/<filename>`.
fn serve_download<S: Read + Write>(
    stream: &mut S,
    root: &Path,
    id: &str,
    filename: &str,
    log: &logging::Logger,
) -> WireResult<()> {
    if !plain_name(id) || !plain_name(filename) {
        abort(stream);
        return Err(WireError::BadFrame);
    }

    let path = root.join(id).join(filename);

    let size = match fs::metadata(&path) {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => {
            abort(stream);
            return Err(WireError::Refused);
        }
        Err(err) => {
            abort(stream);
            return Err(err.into());
        }
    };

    let mut file = match File::open(&path) {
        Ok(file) => file,
        Err(err) => {
            abort(stream);
            return Err(err.into());
        }
    };

    write_frame(stream, &format!("{} {}", READY, size))?;

    match read_frame(stream) {
        Ok(ref frame) if frame == GO => (),
        Ok(_) => {
            abort(stream);
            return Err(WireError::Refused);
        }
        Err(err) => return Err(err),
    }

    let mut buf = [0u8; FRAME_SIZE];

    loop {
        let count = file.read(&mut buf)?;

        if count == 0 {
            break;
        }

        stream.write_all(&buf[..count])?;
    }

    match read_frame(stream) {
        Ok(ref frame) if frame == SUCCESS => {
            debug!(log, "download served"; "id" => id, "file" => filename, "bytes" => size);
            Ok(())
        }
        Ok(_) => {
            abort(stream);
            Err(WireError::Refused)
        }
        Err(err) => Err(err),
    }
}

/// Ids and filenames address a single directory level, path separators and
/// dot-entries are protocol violations.
fn plain_name(part: &str) -> bool {
    !part.is_empty() && !part.contains('/') && !part.contains('\\') && part != "." && part != ".."
}

/// Best-effort abort notice, the connection is torn down either way.
fn abort<S: Write>(stream: &mut S) {
    drop(stream.write_all(ABORT.as_bytes()));
}
