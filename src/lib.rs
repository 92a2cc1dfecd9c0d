// Student Dedup - Core Library
// Duplicate-student detection for an education-business CRM

pub mod db;
pub mod detection;
pub mod normalize;
pub mod similarity;

// Re-export commonly used types
pub use db::{
    get_all_students, get_recent_events, insert_event, insert_students, load_csv, setup_database,
    verify_count, Event, Student,
};
pub use detection::{
    duplicate_stats, find_duplicates, DetectionOptions, DuplicateDetector, DuplicateGroup,
    DuplicateStats, FieldMatch, MatchField,
};
pub use normalize::{normalize_cpf, normalize_email, normalize_phone, normalize_text};
pub use similarity::{similarity_score, MatchStrength};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
