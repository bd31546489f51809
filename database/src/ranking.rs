use mindfeed_core::CandidatePost;

/// Upper bound (exclusive) of the read-time jitter added to each score.
pub const JITTER_RANGE: f32 = 0.1;

/// Orders scored posts for display.
///
/// Unscored rows are dropped. Each remaining score gets a uniform `[0, JITTER_RANGE)` offset
/// for sorting only; the returned posts keep their stored score.
pub fn rank_with_jitter(
    rows: Vec<CandidatePost>,
    rng: &mut fastrand::Rng,
    limit: Option<usize>,
) -> Vec<CandidatePost> {
    let mut keyed: Vec<(f32, CandidatePost)> = rows
        .into_iter()
        .filter_map(|post| {
            let score = post.score?;
            Some((score + rng.f32() * JITTER_RANGE, post))
        })
        .collect();

    keyed.sort_by(|a, b| b.0.total_cmp(&a.0));

    let ranked = keyed.into_iter().map(|(_, post)| post);
    match limit {
        Some(limit) => ranked.take(limit).collect(),
        None => ranked.collect(),
    }
}
