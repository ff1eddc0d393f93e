use super::provider::RenderHandle;

/// What is currently on the render surface for one key: one handle per
/// displayed line, and the text those handles were last given.
///
/// `handles` and `last_text` always have the same length.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Projection {
    pub(crate) handles: Vec<RenderHandle>,
    pub(crate) last_text: Vec<String>,
}

impl Projection {
    pub fn handles(&self) -> &[RenderHandle] {
        &self.handles
    }

    pub fn last_text(&self) -> &[String] {
        &self.last_text
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// The single decision taken for a key per materialize pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Nothing to show; tear the projection down.
    Clear,
    /// Text matches and every handle is live.
    Keep,
    /// Same number of lines, different text: retext the existing handles.
    UpdateInPlace,
    /// Destroy whatever exists and spawn one handle per line.
    Recreate,
}

pub fn plan<F>(current: Option<&Projection>, desired: &[String], is_live: F) -> Plan
where
    F: Fn(RenderHandle) -> bool,
{
    if desired.is_empty() {
        return Plan::Clear;
    }
    let Some(current) = current else {
        return Plan::Recreate;
    };
    if current.is_empty() {
        return Plan::Recreate;
    }

    if current.last_text == desired {
        if current.handles.iter().all(|handle| is_live(*handle)) {
            Plan::Keep
        } else {
            Plan::Recreate
        }
    } else if current.handles.len() == desired.len() {
        Plan::UpdateInPlace
    } else {
        Plan::Recreate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projection(texts: &[&str]) -> Projection {
        Projection {
            handles: (0..texts.len() as u64).map(RenderHandle::new).collect(),
            last_text: texts.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn lines(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_plan_decisions() {
        let current = projection(&["A", "B"]);
        let live = |_| true;

        assert_eq!(plan(None, &lines(&["A"]), live), Plan::Recreate);
        assert_eq!(plan(Some(&current), &[], live), Plan::Clear);
        assert_eq!(plan(Some(&current), &lines(&["A", "B"]), live), Plan::Keep);
        assert_eq!(plan(Some(&current), &lines(&["C", "D"]), live), Plan::UpdateInPlace);
        assert_eq!(plan(Some(&current), &lines(&["A"]), live), Plan::Recreate);
        assert_eq!(
            plan(Some(&current), &lines(&["A", "B", "C"]), live),
            Plan::Recreate
        );
    }

    #[test]
    fn test_dead_handle_forces_recreate() {
        let current = projection(&["A", "B"]);
        let dead_second = |handle: RenderHandle| handle.raw() != 1;
        assert_eq!(
            plan(Some(&current), &lines(&["A", "B"]), dead_second),
            Plan::Recreate
        );
        // Liveness only matters when the text already matches.
        assert_eq!(
            plan(Some(&current), &lines(&["X", "Y"]), dead_second),
            Plan::UpdateInPlace
        );
    }

    #[test]
    fn test_empty_projection_recreates() {
        let empty = Projection::default();
        assert_eq!(plan(Some(&empty), &lines(&["A"]), |_| true), Plan::Recreate);
    }
}
