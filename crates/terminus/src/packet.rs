use mongodb::bson::Document;

/// Collection that receives every frame in its original form.
pub const RAW_COLLECTION: &str = "raw";

/// Envelope naming the target collection for one document. Moves between
/// the processor, the deduplicator, and the recorder; equality is
/// structural over the whole packet, which is what the dedupe window
/// tests.
#[derive(Clone, Debug, PartialEq)]
pub struct DbPacket {
    pub dest: String,
    pub data: Document,
}
