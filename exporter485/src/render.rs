use crate::config::DeviceClass;
use crate::decode::DecodedValue;

/// Text exposition of one collection
///
/// Each metric is written as an optional `# HELP` line, a `# TYPE` line and a
/// value line, named `{class}_{metric}`.
#[derive(Clone, Copy, Debug)]
pub struct Exposition<'a> {
    class: &'a DeviceClass,
    values: &'a [DecodedValue],
}

impl<'a> Exposition<'a> {
    /// Pair the metrics of `class` with the values collected for them
    pub fn new(class: &'a DeviceClass, values: &'a [DecodedValue]) -> Self {
        Self { class, values }
    }
}

impl std::fmt::Display for Exposition<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = &self.class.name;
        for (metric, value) in self.class.metrics.iter().zip(self.values) {
            let name = &metric.name;
            if let Some(help) = &metric.help {
                writeln!(f, "# HELP {prefix}_{name} {help}")?;
            }
            writeln!(f, "# TYPE {prefix}_{name} {}", metric.metric_type)?;
            writeln!(f, "{prefix}_{name} {value}")?;
        }
        Ok(())
    }
}

/// Render the values of a collection of `class`
pub fn render(class: &DeviceClass, values: &[DecodedValue]) -> String {
    Exposition::new(class, values).to_string()
}
