//! Exchange contract bindings.

#[allow(clippy::too_many_arguments)]
pub mod exchange {
    alloy::sol!(
        /// Emitted by the CTF and neg-risk CTF exchanges once per filled maker order.
        ///
        /// Asset ID 0 stands for the USDC collateral, any other ID is an
        /// outcome position token.
        #[derive(Debug, PartialEq, Eq)]
        event OrderFilled(
            bytes32 indexed orderHash,
            address indexed maker,
            address indexed taker,
            uint256 makerAssetId,
            uint256 takerAssetId,
            uint256 makerAmountFilled,
            uint256 takerAmountFilled,
            uint256 fee
        );
    );
}
