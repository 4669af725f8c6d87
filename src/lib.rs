// lib.rs
pub mod alignment_record;
pub mod alignment_source;
pub mod cigar;
pub mod classify;
pub mod commands;
pub mod consistency;
pub mod coverage;
pub mod diff;
pub mod error;
pub mod faidx;
pub mod pipeline;
pub mod request;
pub mod sam;
pub mod scheduler;
pub mod seqidx;
pub mod sequence_index;
