use std::io::{self, Read};

use flate2::read::GzDecoder;

pub fn decompress_gzip(compressed_data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(compressed_data);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}
