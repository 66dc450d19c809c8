use crate::models::RecordedAction;

/// Merge the native recorder's parsed actions with the locally recorded ones.
///
/// The parsed list decides the shape of the result: gesture kinds and fields
/// always come from it. Local actions with a screenshot are consumed in order,
/// one per screenshot-bearing parsed action, donating their screenshot,
/// timestamp and id. Both lists come from the same linear session, so an
/// ordered zip is enough. Local screenshots left over after the parsed list
/// runs out are dropped.
pub fn reconcile(parsed: Vec<RecordedAction>, local: Vec<RecordedAction>) -> Vec<RecordedAction> {
    if parsed.is_empty() {
        return local;
    }
    if local.is_empty() {
        return parsed;
    }

    let mut donors = local.into_iter().filter(RecordedAction::has_screenshot);

    parsed
        .into_iter()
        .map(|mut action| {
            if !action.kind.carries_screenshot() {
                return action;
            }
            if let Some(donor) = donors.next() {
                action.id = donor.id;
                action.timestamp = donor.timestamp;
                action.screenshot_path = donor.screenshot_path;
            }
            action
        })
        .collect()
}
