use std::collections::HashMap;
use std::path::Path;

// Hex image --------------------------------------------------------------------------------------

///
/// One continuous memory area of a hex image.
///
#[derive(Debug, Clone)]
pub struct HexArea {
    /// Absolute address of the first byte
    pub offset: u32,

    /// Raw bytes of the area
    pub data: Vec<u8>,
}

impl HexArea {
    pub fn new(offset: u32, data: Vec<u8>) -> HexArea {
        HexArea { offset, data }
    }
}

///
/// Parsed representation of one hex file.
///
/// Produced by an external Intel/Motorola hex parser behind the `HexFileReader` port.
/// `signature_address` and `device_name` are optional because not every hex file carries
/// them; the update sequences decide how to treat their absence.
///
#[derive(Debug, Clone)]
pub struct HexImage {
    /// Continuous memory areas, sorted by rising offset
    pub areas: Vec<HexArea>,

    /// Address of the signature block, if the file contains one
    pub signature_address: Option<u32>,

    /// Device name embedded in the file, if the file contains one
    pub device_name: Option<String>,
}

impl HexImage {
    pub fn new(areas: Vec<HexArea>) -> HexImage {
        HexImage {
            areas,
            signature_address: None,
            device_name: None,
        }
    }

    /// Total number of payload bytes over all areas
    pub fn total_byte_count(&self) -> u32 {
        self.areas.iter().map(|area| area.data.len() as u32).sum()
    }
}

// Hex file reader port ---------------------------------------------------------------------------

/// Reasons a hex file cannot be turned into a `HexImage`
#[derive(Debug, PartialEq, Clone)]
pub enum HexFileError {
    /// File missing, unreadable or not a valid Intel or Motorola hex file
    Load(String),
}

///
/// Port to the hex file parser.
///
/// The update engine never parses hex files itself; it asks this port for the parsed image.
///
pub trait HexFileReader {
    fn read(&mut self, path: &str) -> Result<HexImage, HexFileError>;
}

///
/// Hex file reader serving pre-parsed images from memory.
///
/// Images are registered under the file name (without directory components). Lookup is by
/// exact file name first; if that misses and the requested name carries a numeric staging
/// prefix (`1_app.hex`), the prefix is stripped and the lookup retried, so copies renamed
/// by the temporary folder preparation still resolve to the image registered under the
/// original name. Used as the default implementation in tests and by callers that already
/// hold parsed images.
///
#[derive(Default)]
pub struct MemoryHexFileReader {
    images: HashMap<String, HexImage>,
}

impl MemoryHexFileReader {
    pub fn new() -> MemoryHexFileReader {
        MemoryHexFileReader {
            images: HashMap::new(),
        }
    }

    /// Register an image under a file name
    pub fn add_image(&mut self, file_name: &str, image: HexImage) {
        self.images.insert(file_name.to_string(), image);
    }
}

impl HexFileReader for MemoryHexFileReader {
    fn read(&mut self, path: &str) -> Result<HexImage, HexFileError> {
        let file_name = Path::new(path)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string());

        if let Some(image) = self.images.get(&file_name) {
            return Ok(image.clone());
        }

        // staging copies for address based nodes carry an "<index>_" prefix
        if let Some((prefix, original_name)) = file_name.split_once('_') {
            if !prefix.is_empty() && prefix.chars().all(|character| character.is_ascii_digit()) {
                if let Some(image) = self.images.get(original_name) {
                    return Ok(image.clone());
                }
            }
        }

        Err(HexFileError::Load(format!(
            "No image registered for \"{}\"",
            file_name
        )))
    }
}

// Tests ------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_image_total_byte_count() {
        let image = HexImage::new(vec![
            HexArea::new(0x1000, vec![0u8; 100]),
            HexArea::new(0x2000, vec![0u8; 200]),
        ]);

        assert_eq!(image.total_byte_count(), 300);
    }

    #[test]
    fn memory_reader_resolves_by_file_name() {
        let mut reader = MemoryHexFileReader::new();
        reader.add_image("app.hex", HexImage::new(vec![HexArea::new(0, vec![1, 2])]));

        let image = reader.read("/tmp/staging/Node1/app.hex").unwrap();
        assert_eq!(image.areas.len(), 1);
        assert_eq!(image.areas[0].data, vec![1, 2]);
    }

    #[test]
    fn memory_reader_strips_staging_index_prefix() {
        let mut reader = MemoryHexFileReader::new();
        reader.add_image("app.hex", HexImage::new(vec![HexArea::new(0, vec![1, 2])]));

        let image = reader.read("/tmp/staging/Node1/1_app.hex").unwrap();
        assert_eq!(image.areas[0].data, vec![1, 2]);
    }

    #[test]
    fn memory_reader_prefers_exact_name_over_stripped_one() {
        let mut reader = MemoryHexFileReader::new();
        reader.add_image("app.hex", HexImage::new(vec![HexArea::new(0, vec![1])]));
        reader.add_image("2_app.hex", HexImage::new(vec![HexArea::new(0, vec![2])]));

        let image = reader.read("/tmp/staging/Node1/2_app.hex").unwrap();
        assert_eq!(image.areas[0].data, vec![2]);
    }

    #[test]
    fn memory_reader_keeps_non_numeric_prefix() {
        let mut reader = MemoryHexFileReader::new();
        reader.add_image("app.hex", HexImage::new(vec![HexArea::new(0, vec![1])]));

        // "my_app.hex" is a different file, not a staging copy of "app.hex"
        let result = reader.read("/tmp/staging/Node1/my_app.hex");
        assert!(matches!(result, Err(HexFileError::Load(_))));
    }

    #[test]
    fn memory_reader_unknown_file_is_load_error() {
        let mut reader = MemoryHexFileReader::new();

        let result = reader.read("unknown.hex");
        assert!(matches!(result, Err(HexFileError::Load(_))));
    }
}
