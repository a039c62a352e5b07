//! Seat occupancy inference and evaluation on single-image object detections.
//!
//! Detections of chairs and people come from an external [`Detector`](detection::Detector).
//! The engine decides which seats are occupied, and scores predicted seats against
//! hand-labeled ground truth.

mod common;
pub mod batch;
pub mod config;
pub mod detection;
pub mod evaluation;
pub mod matching;
pub mod occupancy;
pub mod pose;
pub mod report;
