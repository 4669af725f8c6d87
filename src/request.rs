use crate::classify::MappingClass;

/// Which mappings contribute to a coverage result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadClassFilter {
    enabled: u8,
    pub min_mapping_quality: u8,
}

impl Default for ReadClassFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl ReadClassFilter {
    pub fn all() -> Self {
        Self::only(&MappingClass::ALL)
    }

    pub fn only(classes: &[MappingClass]) -> Self {
        let enabled = classes
            .iter()
            .fold(0u8, |mask, class| mask | (1 << class.index()));
        Self {
            enabled,
            min_mapping_quality: 0,
        }
    }

    pub fn with_min_mapping_quality(mut self, min_mapping_quality: u8) -> Self {
        self.min_mapping_quality = min_mapping_quality;
        self
    }

    pub fn is_enabled(&self, class: MappingClass) -> bool {
        self.enabled & (1 << class.index()) != 0
    }

    pub fn accepts(&self, class: MappingClass, mapping_quality: u8) -> bool {
        self.is_enabled(class) && mapping_quality >= self.min_mapping_quality
    }

    pub fn enabled_classes(&self) -> Vec<MappingClass> {
        MappingClass::ALL
            .into_iter()
            .filter(|&class| self.is_enabled(class))
            .collect()
    }
}

/// Coverage request for one chromosome.
///
/// `from..=to` is the window the caller needs; `total_from..=total_to` is the
/// padded window actually fetched, so later requests shifted by less than the
/// padding are served from the cached result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalRequest {
    pub from: i64,
    pub to: i64,
    pub total_from: i64,
    pub total_to: i64,
    pub chromosome_id: u32,
    pub wants_diffs_and_gaps: bool,
    pub read_class_filter: ReadClassFilter,
}

impl IntervalRequest {
    pub fn new(chromosome_id: u32, from: i64, to: i64) -> Self {
        let (from, to) = if from <= to { (from, to) } else { (to, from) };
        Self {
            from,
            to,
            total_from: from,
            total_to: to,
            chromosome_id,
            wants_diffs_and_gaps: false,
            read_class_filter: ReadClassFilter::default(),
        }
    }

    /// Widen the fetch window by `padding` on both sides, never below position 1
    /// and never past `chromosome_length` when it is known.
    pub fn with_padding(mut self, padding: i64, chromosome_length: Option<i64>) -> Self {
        self.total_from = (self.from - padding).max(1);
        self.total_to = self.to + padding;
        if let Some(length) = chromosome_length {
            self.total_to = self.total_to.min(length.max(self.to));
        }
        self
    }

    pub fn with_diffs_and_gaps(mut self, wants_diffs_and_gaps: bool) -> Self {
        self.wants_diffs_and_gaps = wants_diffs_and_gaps;
        self
    }

    pub fn with_read_class_filter(mut self, read_class_filter: ReadClassFilter) -> Self {
        self.read_class_filter = read_class_filter;
        self
    }
}
