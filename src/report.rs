//! Interface of the cloud reporting sink that consumes decoded samples.
use crate::protocol::{DataPoint, TelemetrySample, Value};

/// Accepts single values tagged with their [`DataPoint`].
pub trait Reporter {
    type Error;

    fn report(&mut self, point: DataPoint, value: Value) -> Result<(), Self::Error>;
}

/// Reports all values of `sample` in data point order, stopping at the first failure.
pub fn report_sample<R: Reporter + ?Sized>(
    reporter: &mut R,
    sample: &TelemetrySample,
) -> Result<(), R::Error> {
    for (point, value) in sample.values() {
        reporter.report(point, value)?;
    }
    Ok(())
}
