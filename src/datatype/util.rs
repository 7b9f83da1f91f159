use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::Path;

use datatype::Error;


pub struct Util;

impl Util {
    pub fn read_file(path: &str) -> Result<Vec<u8>, Error> {
        let mut file = BufReader::new(File::open(path)
            .map_err(|err| Error::Io(err))?);
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    pub fn read_text(path: &str) -> Result<String, Error> {
        Ok(String::from_utf8(Util::read_file(path)?)?)
    }

    pub fn write_file(path: &str, buf: &[u8]) -> Result<(), Error> {
        if let Some(dir) = Path::new(path).parent() {
            fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(buf)?;
        file.flush()?;
        Ok(())
    }

    /// Write to a sibling temp file then rename, so a reader never
    /// observes a partially written row.
    pub fn atomic_write(path: &str, buf: &[u8]) -> Result<(), Error> {
        let tmp = format!("{}.tmp", path);
        Util::write_file(&tmp, buf)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;


    #[test]
    fn test_write_then_read() {
        let path = "/tmp/ota-test-util-rw";
        Util::write_file(path, b"hello").expect("write");
        assert_eq!(Util::read_file(path).expect("read"), b"hello".to_vec());
        fs::remove_file(path).expect("cleanup");
    }

    #[test]
    fn test_atomic_write_replaces() {
        let path = "/tmp/ota-test-util-atomic";
        Util::atomic_write(path, b"first").expect("write");
        Util::atomic_write(path, b"second").expect("overwrite");
        assert_eq!(Util::read_text(path).expect("read"), "second");
        fs::remove_file(path).expect("cleanup");
    }
}
