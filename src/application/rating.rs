use crate::domain::ids::UserId;
use crate::domain::review::{RatingValue, Review};
use rust_decimal::Decimal;

/// Mean rating of every review left for `tasker_id`, or zero when there are none.
///
/// Always derived from the full review set; integer sums keep the result
/// independent of review order.
pub fn recompute(reviews: &[Review], tasker_id: UserId) -> RatingValue {
    let (sum, count) = reviews
        .iter()
        .filter(|review| review.tasker_id == tasker_id)
        .fold((0u64, 0u64), |(sum, count), review| {
            (sum + u64::from(review.rating.value()), count + 1)
        });
    if count == 0 {
        return RatingValue::ZERO;
    }
    RatingValue((Decimal::from(sum) / Decimal::from(count)).normalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::JobId;
    use crate::domain::review::Rating;
    use rand::seq::SliceRandom;
    use rust_decimal_macros::dec;

    fn review(tasker_id: UserId, rating: u8) -> Review {
        Review::new(
            JobId::random(),
            tasker_id,
            UserId::random(),
            Rating::new(rating).unwrap(),
            "",
        )
    }

    #[test]
    fn test_no_reviews_is_zero() {
        assert_eq!(recompute(&[], UserId::random()), RatingValue::ZERO);
    }

    #[test]
    fn test_mean_of_matching_reviews_only() {
        let tasker = UserId::random();
        let other = UserId::random();
        let mut reviews: Vec<Review> = [5, 3, 4].into_iter().map(|r| review(tasker, r)).collect();
        reviews.push(review(other, 1));

        assert_eq!(recompute(&reviews, tasker), RatingValue(dec!(4)));
        reviews.push(review(tasker, 2));
        assert_eq!(recompute(&reviews, tasker), RatingValue(dec!(3.5)));
        assert_eq!(recompute(&reviews, other), RatingValue(dec!(1)));
    }

    #[test]
    fn test_order_does_not_matter() {
        let tasker = UserId::random();
        let mut reviews: Vec<Review> = [1, 2, 2, 5, 4, 3, 5, 1, 4]
            .into_iter()
            .map(|r| review(tasker, r))
            .collect();
        let expected = recompute(&reviews, tasker);
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            reviews.shuffle(&mut rng);
            assert_eq!(recompute(&reviews, tasker), expected);
        }
        assert_eq!(expected, RatingValue(dec!(27) / dec!(9)));
    }
}
