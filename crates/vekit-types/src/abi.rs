//! Solidity bindings for the smart-account contracts, the account factory, and ERC-20 tokens.

use alloy_sol_types::sol;

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface ISimpleAccount {
        function executeWithAuthorization(
            address to,
            uint256 value,
            bytes data,
            uint256 validAfter,
            uint256 validBefore,
            bytes signature
        ) external;

        function executeBatchWithAuthorization(
            address[] to,
            uint256[] value,
            bytes[] data,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            bytes signature
        ) external;

        function version() external view returns (uint256);
    }

    #[derive(Debug, PartialEq, Eq)]
    interface ISimpleAccountFactory {
        function createAccount(address owner) external returns (address);
        function getAccountAddress(address owner) external view returns (address);
        function currentAccountImplementationVersion() external view returns (uint256);
    }

    #[derive(Debug, PartialEq, Eq)]
    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
        function balanceOf(address owner) external view returns (uint256);
    }

    /// Typed-data message signed by the account owner for one call.
    #[derive(Debug, PartialEq, Eq)]
    struct ExecuteWithAuthorization {
        address to;
        uint256 value;
        bytes data;
        uint256 validAfter;
        uint256 validBefore;
    }

    /// Typed-data message signed by the account owner for an ordered batch of calls.
    #[derive(Debug, PartialEq, Eq)]
    struct ExecuteBatchWithAuthorization {
        address[] to;
        uint256[] value;
        bytes[] data;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}
