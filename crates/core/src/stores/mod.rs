pub mod memory;
pub mod postgrest;
pub mod supabase;

pub use memory::{MemoryObjectStore, MemoryVectorStore, StoredVectorRow};
pub use postgrest::PostgrestVectorStore;
pub use supabase::{SupabaseConnection, SupabaseStorage};
