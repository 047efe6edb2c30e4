use super::types::{WithdrawalPolicy, WithdrawalStrategy};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WithdrawalContext {
    /// Liquid portfolio value at the start of the year.
    pub portfolio_value: f64,
    /// Last year's un-prorated withdrawal, `None` in the first year.
    pub prior_withdrawal: Option<f64>,
    pub inflation: f64,
}

/// Annual withdrawal under `policy`, never below either floor.
pub fn target_withdrawal(policy: &WithdrawalPolicy, ctx: WithdrawalContext) -> f64 {
    let value = ctx.portfolio_value.max(0.0);
    let rate = policy.initial_rate.max(0.0);

    let computed = match policy.strategy {
        WithdrawalStrategy::ConstantDollar => match ctx.prior_withdrawal {
            Some(prior) => prior.max(0.0) * (1.0 + ctx.inflation),
            None => value * rate,
        },
        WithdrawalStrategy::ConstantPercentage => value * rate,
    };

    let rate_floor = policy.rate_floor.max(0.0) * value;
    computed.max(policy.dollar_floor.max(0.0)).max(rate_floor).max(0.0)
}
