//! Core functionality: image discovery, embeddings and similarity ranking

/// Explicit execution-device preferences for the embedding model.
pub mod device;
/// Wraps embedding models and encodes folders into unit feature vectors.
pub mod embeddings;
/// Computes and ranks pairwise cosine similarities.
pub mod similarity;
/// Discovers, decodes and describes the images of a folder.
pub mod source;
