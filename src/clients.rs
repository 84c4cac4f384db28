pub(crate) mod captions;
pub(crate) mod catalog;
pub(crate) mod gemini;

pub(crate) use captions::CaptionClient;
pub(crate) use catalog::CatalogClient;
pub(crate) use gemini::GeminiClient;
