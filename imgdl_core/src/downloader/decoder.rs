use image::DynamicImage;

use crate::types::types::DownloadError;

/// Turns a response body into the payload stored in the result cache.
pub trait PayloadDecoder: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    fn decode(&self, bytes: &[u8]) -> Result<Self::Output, DownloadError>;
}

/// Decodes any format the `image` crate can sniff from the bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDecoder;

impl PayloadDecoder for ImageDecoder {
    type Output = DynamicImage;

    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, DownloadError> {
        if bytes.is_empty() {
            return Err(DownloadError::Decode("empty body".to_string()));
        }
        image::load_from_memory(bytes).map_err(|e| DownloadError::Decode(e.to_string()))
    }
}
