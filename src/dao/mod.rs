/// Hook invoked after a room is deleted.
pub mod cleanup;
/// Database model definitions.
pub mod models;
/// Room repository abstraction and its in-memory implementation.
pub mod room_store;
/// Storage error types shared by repositories.
pub mod storage;
