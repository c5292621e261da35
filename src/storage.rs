// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

// ============================================================================
// Storage Trait
// ============================================================================

/// Where a completed file goes after FILE_END. The protocol treats storage as
/// fire-and-forget: a store failure is reported to the operator but never
/// NACKed back to the sender.
pub trait Storage: Send {
    fn store(&mut self, filename: &str, data: &[u8]) -> std::io::Result<()>;
}

// ============================================================================
// Directory-Backed Storage
// ============================================================================

/// Writes each completed file into a target directory.
pub struct DirStorage {
    output_dir: PathBuf,
}

impl DirStorage {
    pub fn new(output_dir: PathBuf) -> Self {
        DirStorage { output_dir }
    }
}

impl Storage for DirStorage {
    fn store(&mut self, filename: &str, data: &[u8]) -> std::io::Result<()> {
        // Sender-supplied name; keep only the final path component
        let name = Path::new(filename)
            .file_name()
            .ok_or_else(|| std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unusable filename: {:?}", filename),
            ))?;

        let path = self.output_dir.join(name);
        let mut file = File::create(&path)?;
        file.write_all(data)?;
        Ok(())
    }
}

// ============================================================================
// Mock Storage for Testing
// ============================================================================

/// Records every store call and checks the log against the expected
/// (filename, contents) pairs when dropped.
#[cfg(test)]
pub struct MockStorage {
    stored: Vec<(String, Vec<u8>)>,
    expected: Vec<(String, Vec<u8>)>,
}

#[cfg(test)]
impl MockStorage {
    pub fn new(expected: Vec<(String, Vec<u8>)>) -> Self {
        MockStorage {
            stored: Vec::new(),
            expected,
        }
    }
}

#[cfg(test)]
impl Storage for MockStorage {
    fn store(&mut self, filename: &str, data: &[u8]) -> std::io::Result<()> {
        self.stored.push((filename.to_string(), data.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
impl Drop for MockStorage {
    fn drop(&mut self) {
        assert_eq!(
            self.stored.len(),
            self.expected.len(),
            "MockStorage saw {} store calls, expected {}",
            self.stored.len(),
            self.expected.len()
        );

        for (got, want) in self.stored.iter().zip(&self.expected) {
            assert_eq!(got.0, want.0, "stored filename mismatch");
            assert_eq!(got.1, want.1, "stored contents mismatch for {}", want.0);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_storage_writes_file() {
        let dir = std::env::temp_dir();
        let mut storage = DirStorage::new(dir.clone());

        storage.store("uflink_storage_test.bin", b"stored bytes")
            .expect("store should succeed");

        let path = dir.join("uflink_storage_test.bin");
        let content = std::fs::read(&path).expect("should read back");
        assert_eq!(content, b"stored bytes");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_dir_storage_strips_path_components() {
        let dir = std::env::temp_dir();
        let mut storage = DirStorage::new(dir.clone());

        storage.store("sub/dir/uflink_storage_strip.bin", b"x")
            .expect("store should succeed");

        let path = dir.join("uflink_storage_strip.bin");
        assert!(path.exists(), "file should land in the output dir itself");

        std::fs::remove_file(&path).ok();
    }
}
