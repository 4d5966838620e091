use chrono::{DateTime, Utc};
use nfsio_client::protocol::mode;
use nfsio_client::NfsStat64;
use serde::Serialize;

/// Seconds and nanoseconds since the Unix epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Timespec {
    pub sec: u64,
    pub nsec: u64,
}

impl Timespec {
    /// Convert to a chrono timestamp, `None` if out of range
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let sec = i64::try_from(self.sec).ok()?;
        let nsec = u32::try_from(self.nsec).ok()?;
        DateTime::from_timestamp(sec, nsec)
    }
}

/// Snapshot of a file's attributes taken at stat time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatRecord {
    pub dev: u64,
    pub ino: u64,
    pub mode: u64,
    pub nlink: u64,
    pub uid: u64,
    pub gid: u64,
    pub rdev: u64,
    pub size: u64,
    pub blksize: u64,
    pub blocks: u64,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
}

impl StatRecord {
    /// File type bits of `mode`
    pub fn file_type(&self) -> u32 {
        self.mode as u32 & mode::S_IFMT
    }

    /// Permission bits of `mode`
    pub fn permissions(&self) -> u32 {
        self.mode as u32 & 0o7777
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == mode::S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == mode::S_IFREG
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == mode::S_IFLNK
    }
}

impl From<&NfsStat64> for StatRecord {
    fn from(st: &NfsStat64) -> Self {
        Self {
            dev: st.nfs_dev,
            ino: st.nfs_ino,
            mode: st.nfs_mode,
            nlink: st.nfs_nlink,
            uid: st.nfs_uid,
            gid: st.nfs_gid,
            rdev: st.nfs_rdev,
            size: st.nfs_size,
            blksize: st.nfs_blksize,
            blocks: st.nfs_blocks,
            atime: Timespec { sec: st.nfs_atime, nsec: st.nfs_atime_nsec },
            mtime: Timespec { sec: st.nfs_mtime, nsec: st.nfs_mtime_nsec },
            ctime: Timespec { sec: st.nfs_ctime, nsec: st.nfs_ctime_nsec },
        }
    }
}

impl From<NfsStat64> for StatRecord {
    fn from(st: NfsStat64) -> Self {
        Self::from(&st)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NfsStat64 {
        NfsStat64 {
            nfs_dev: 7,
            nfs_ino: 42,
            nfs_mode: (mode::S_IFREG | 0o640) as u64,
            nfs_nlink: 1,
            nfs_uid: 1000,
            nfs_gid: 100,
            nfs_rdev: 0,
            nfs_size: 5,
            nfs_blksize: 4096,
            nfs_blocks: 1,
            nfs_atime: 1_700_000_000,
            nfs_mtime: 1_700_000_001,
            nfs_ctime: 1_700_000_002,
            nfs_atime_nsec: 10,
            nfs_mtime_nsec: 20,
            nfs_ctime_nsec: 30,
        }
    }

    #[test]
    fn test_projection_copies_every_field() {
        let record = StatRecord::from(sample());

        assert_eq!(record.dev, 7);
        assert_eq!(record.ino, 42);
        assert_eq!(record.nlink, 1);
        assert_eq!((record.uid, record.gid), (1000, 100));
        assert_eq!(record.size, 5);
        assert_eq!((record.blksize, record.blocks), (4096, 1));
        assert_eq!(record.atime, Timespec { sec: 1_700_000_000, nsec: 10 });
        assert_eq!(record.mtime, Timespec { sec: 1_700_000_001, nsec: 20 });
        assert_eq!(record.ctime, Timespec { sec: 1_700_000_002, nsec: 30 });
        assert!(record.is_file());
        assert!(!record.is_dir() && !record.is_symlink());
        assert_eq!(record.permissions(), 0o640);
    }

    #[test]
    fn test_serialized_shape() {
        let value = serde_json::to_value(StatRecord::from(sample())).unwrap();
        let keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();

        for key in ["dev", "ino", "mode", "nlink", "uid", "gid", "rdev", "size", "blksize", "blocks"] {
            assert!(keys.contains(&key), "missing {}", key);
        }
        assert_eq!(value["mtime"]["sec"], 1_700_000_001u64);
        assert_eq!(value["ctime"]["nsec"], 30);
    }

    #[test]
    fn test_timespec_to_datetime() {
        let ts = Timespec { sec: 1_700_000_000, nsec: 500 };
        let dt = ts.to_datetime().unwrap();
        assert_eq!(dt.timestamp(), 1_700_000_000);
        assert_eq!(dt.timestamp_subsec_nanos(), 500);

        assert!(Timespec { sec: u64::MAX, nsec: 0 }.to_datetime().is_none());
    }
}
