// Helper class for watching file descriptors
// OS-compatibility layer
//
// The watcher never owns the descriptors it is given. Callers
// keep them alive for as long as they are registered.
extern crate nix;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::sys::select::*;
use nix::sys::time::{TimeVal, TimeValLike};

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::BorrowedFd;
use std::os::unix::io::{AsRawFd, RawFd};

// A file descriptor watcher
pub struct FdWatch {
    // fds to watch for readability
    fdw_fds: Vec<RawFd>,
}

impl FdWatch {
    pub fn new() -> FdWatch {
        FdWatch {
            fdw_fds: Vec::new(),
        }
    }

    pub fn add_fd(&mut self, fd: RawFd) {
        if !self.fdw_fds.contains(&fd) {
            self.fdw_fds.push(fd);
        }
    }

    pub fn remove_fd(&mut self, fd: RawFd) {
        self.fdw_fds.retain(|f| *f != fd);
    }

    pub fn len(&self) -> usize {
        self.fdw_fds.len()
    }

    // timeout in ms
    //
    // Blocks until at least one fd is readable or the timeout expires.
    // Returns the list of readable fds, which is empty on timeout.
    // Interrupted waits are restarted.
    pub fn wait_for_events(&mut self, timeout: Option<usize>) -> nix::Result<Vec<RawFd>> {
        loop {
            let mut fdset = FdSet::new();
            for fd in self.fdw_fds.iter() {
                // The caller guarantees registered fds outlive the watch
                fdset.insert(unsafe { BorrowedFd::borrow_raw(*fd) });
            }

            let mut out = match timeout {
                Some(ms) => Some(TimeVal::milliseconds(ms as i64)),
                None => None,
            };

            match select(None, Some(&mut fdset), None, None, out.as_mut()) {
                Ok(_) => {
                    return Ok(self
                        .fdw_fds
                        .iter()
                        .filter(|fd| fdset.contains(unsafe { BorrowedFd::borrow_raw(**fd) }))
                        .copied()
                        .collect());
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

/// A pipe used purely to wake up an FdWatch from another thread
///
/// Both ends are non-blocking. Any number of wakes between two drains
/// collapse into one readable event.
pub struct WakePipe {
    wp_read: File,
    wp_write: File,
}

impl WakePipe {
    pub fn new() -> nix::Result<Self> {
        let (read, write) = nix::unistd::pipe()?;
        for fd in [read.as_raw_fd(), write.as_raw_fd()].iter() {
            fcntl(*fd, FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;
            fcntl(*fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
        }

        Ok(Self {
            wp_read: File::from(read),
            wp_write: File::from(write),
        })
    }

    /// The end to add to an FdWatch
    pub fn read_fd(&self) -> RawFd {
        self.wp_read.as_raw_fd()
    }

    /// Make the read end readable
    pub fn wake(&self) {
        // A full pipe is already readable, so that failure is fine
        if let Err(e) = (&self.wp_write).write(&[1]) {
            if e.kind() != ErrorKind::WouldBlock {
                crate::error!("Could not write to wake pipe: {:?}", e);
            }
        }
    }

    /// Consume all pending wakes, returning how many were read
    pub fn drain(&self) -> usize {
        let mut buf = [0u8; 64];
        let mut total = 0;

        loop {
            match (&self.wp_read).read(&mut buf) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::{FdWatch, WakePipe};
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn reports_only_readable_fds() {
        let (mut a, b) = UnixStream::pair().unwrap();
        let (_c, d) = UnixStream::pair().unwrap();

        let mut watch = FdWatch::new();
        watch.add_fd(b.as_raw_fd());
        watch.add_fd(d.as_raw_fd());

        assert!(watch.wait_for_events(Some(10)).unwrap().is_empty());

        a.write_all(&[1]).unwrap();
        let ready = watch.wait_for_events(Some(1000)).unwrap();
        assert_eq!(ready, vec![b.as_raw_fd()]);
    }

    #[test]
    fn wake_pipe_collapses_wakes() {
        let pipe = WakePipe::new().unwrap();
        let mut watch = FdWatch::new();
        watch.add_fd(pipe.read_fd());

        pipe.wake();
        pipe.wake();
        assert_eq!(watch.wait_for_events(Some(1000)).unwrap(), vec![pipe.read_fd()]);
        assert_eq!(pipe.drain(), 2);
        assert_eq!(pipe.drain(), 0);
        assert!(watch.wait_for_events(Some(10)).unwrap().is_empty());
    }

    #[test]
    fn remove_fd_stops_watching() {
        let (mut a, b) = UnixStream::pair().unwrap();
        let mut watch = FdWatch::new();
        watch.add_fd(b.as_raw_fd());
        watch.add_fd(b.as_raw_fd());
        assert_eq!(watch.len(), 1);
        watch.remove_fd(b.as_raw_fd());
        a.write_all(&[1]).unwrap();
        assert!(watch.wait_for_events(Some(10)).unwrap().is_empty());
    }
}
