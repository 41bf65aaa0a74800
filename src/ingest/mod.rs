/// Data ingestion from the telemetry repository.
///
/// Submodules:
/// - `sensor`: repository client, payload parsing and channel selection.
pub mod sensor;
